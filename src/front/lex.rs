//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    kind: TokenKind,
    /// What part of the input this token carries.
    text: &'src str,
}

impl<'src> Token<'src> {
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn text(&self) -> &'src str {
        self.text
    }
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("num")]
    Num,
    #[display("string")]
    Str,
    #[display("char")]
    CharConst,
    // keywords; an id is promoted to one of these after matching
    #[display("break")]
    Break,
    #[display("char")]
    Char,
    #[display("continue")]
    Continue,
    #[display("do")]
    Do,
    #[display("else")]
    Else,
    #[display("for")]
    For,
    #[display("if")]
    If,
    #[display("int")]
    Int,
    #[display("return")]
    Return,
    #[display("void")]
    Void,
    #[display("while")]
    While,
    #[display("asm")]
    Asm,
    #[display("printstr")]
    PrintStr,
    // operators
    #[display("||")]
    OrOr,
    #[display("&&")]
    AndAnd,
    #[display("<=")]
    Le,
    #[display(">=")]
    Ge,
    #[display("==")]
    EqEq,
    #[display("!=")]
    Ne,
    #[display("*=")]
    MulAssign,
    #[display("/=")]
    DivAssign,
    #[display("+=")]
    PlusAssign,
    #[display("-=")]
    MinusAssign,
    #[display("&=")]
    AndAssign,
    #[display("|=")]
    OrAssign,
    #[display("^=")]
    XorAssign,
    #[display("++")]
    PlusPlus,
    #[display("--")]
    MinusMinus,
    #[display("=")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("&")]
    Amp,
    #[display("|")]
    Pipe,
    #[display("^")]
    Caret,
    #[display("~")]
    Tilde,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display(";")]
    Semi,
    #[display(",")]
    Comma,
    #[display("!")]
    Bang,
    #[display("<")]
    Lt,
    #[display(">")]
    Gt,
}

pub struct LexError(usize, char);

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Lexer error: unexpected character {:?} at {}", self.1, self.0)
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;

        // Multi-character operators come before their single-character
        // prefixes; the first matcher that hits wins.
        let table: &[(&str, TokenKind)] = &[
            (r"\A\d+", Num),
            (r#"\A"(?:[^"\\\n]|\\.)*""#, Str),
            (r"\A'(?:[^'\\\n]|\\.)*'", CharConst),
            (r"\A[A-Za-z_]\w*", Id),
            (r"\A\|\|", OrOr),
            (r"\A&&", AndAnd),
            (r"\A<=", Le),
            (r"\A>=", Ge),
            (r"\A==", EqEq),
            (r"\A!=", Ne),
            (r"\A\*=", MulAssign),
            (r"\A/=", DivAssign),
            (r"\A\+=", PlusAssign),
            (r"\A-=", MinusAssign),
            (r"\A&=", AndAssign),
            (r"\A\|=", OrAssign),
            (r"\A\^=", XorAssign),
            (r"\A\+\+", PlusPlus),
            (r"\A--", MinusMinus),
            (r"\A=", Assign),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A/", Slash),
            (r"\A&", Amp),
            (r"\A\|", Pipe),
            (r"\A\^", Caret),
            (r"\A~", Tilde),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A\[", LBracket),
            (r"\A\]", RBracket),
            (r"\A;", Semi),
            (r"\A,", Comma),
            (r"\A!", Bang),
            (r"\A<", Lt),
            (r"\A>", Gt),
        ];

        Lexer {
            input,
            pos: 0,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|//[^\n]*|#[^\n]*|/\*(?s:.)*?\*/)*")
                .unwrap(),
            matchers: table
                .iter()
                .map(|(re, kind)| (Regex::new(re).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    // Skip comments, preprocessor lines and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.pos += m.end()
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        let rest = &self.input[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        let hit = self
            .matchers
            .iter()
            .find_map(|(re, kind)| re.find(rest).map(|m| (m.end(), *kind)));
        match hit {
            Some((len, kind)) => {
                let text = &rest[..len];
                self.pos += len;
                let kind = if kind == TokenKind::Id {
                    keyword(text).unwrap_or(kind)
                } else {
                    kind
                };
                Ok(Some(Token { kind, text }))
            }
            None => match rest.chars().next() {
                Some(c) => Err(LexError(self.pos, c)),
                None => Ok(None),
            },
        }
    }
}

fn keyword(text: &str) -> Option<TokenKind> {
    use TokenKind::*;

    Some(match text {
        "break" => Break,
        "char" => Char,
        "continue" => Continue,
        "do" => Do,
        "else" => Else,
        "for" => For,
        "if" => If,
        "int" => Int,
        "return" => Return,
        "void" => Void,
        "while" => While,
        "asm" => Asm,
        "printstr" => PrintStr,
        _ => return None,
    })
}

/// Lex the whole input up front.
pub fn tokens(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut out = Vec::new();
    while let Some(token) = lexer.next()? {
        out.push(token);
    }
    Ok(out)
}
