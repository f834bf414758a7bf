use logos::{Lexer, Logos};

fn unquote<'a>(lex: &mut Lexer<'a, DatalogToken<'a>>) -> String {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(character) = chars.next() {
        if character == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(character);
        }
    }
    out
}

#[derive(Logos, Debug, PartialEq, Clone)]
pub enum DatalogToken<'a> {
    #[token(".decl")]
    Decl,
    #[token(".type")]
    Type,
    #[token(".input")]
    Input,
    #[token(".output")]
    Output,
    #[token(".pragma")]
    Pragma,
    #[token(".plan")]
    Plan,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident(&'a str),
    #[regex(r"[0-9]+", |lex| lex.slice().parse())]
    Number(i32),
    #[regex(r#""([^"\\]|\\.)*""#, unquote)]
    Str(String),
    #[token(":-")]
    If,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Bang,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("$")]
    Dollar,
    #[error]
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*([^*]|\*[^/])*\*/", logos::skip)]
    Error,
}

#[cfg(test)]
mod tests {
    use super::DatalogToken;
    use logos::Logos;

    #[test]
    fn test_lex_rule() {
        let mut lex = DatalogToken::lexer("T(x, z) :- T(x, y), E(y, z).");

        assert_eq!(lex.next(), Some(DatalogToken::Ident("T")));
        assert_eq!(lex.next(), Some(DatalogToken::LParen));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("x")));
        assert_eq!(lex.next(), Some(DatalogToken::Comma));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("z")));
        assert_eq!(lex.next(), Some(DatalogToken::RParen));
        assert_eq!(lex.next(), Some(DatalogToken::If));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("T")));
    }

    #[test]
    fn test_lex_declaration_and_directives() {
        let mut lex = DatalogToken::lexer(".decl E(a: number) .input E .pragma \"k\" \"v\"");

        assert_eq!(lex.next(), Some(DatalogToken::Decl));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("E")));
        assert_eq!(lex.next(), Some(DatalogToken::LParen));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("a")));
        assert_eq!(lex.next(), Some(DatalogToken::Colon));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("number")));
        assert_eq!(lex.next(), Some(DatalogToken::RParen));
        assert_eq!(lex.next(), Some(DatalogToken::Input));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("E")));
        assert_eq!(lex.next(), Some(DatalogToken::Pragma));
        assert_eq!(lex.next(), Some(DatalogToken::Str("k".to_string())));
        assert_eq!(lex.next(), Some(DatalogToken::Str("v".to_string())));
    }

    #[test]
    fn test_lex_string_escapes() {
        let mut lex = DatalogToken::lexer(r#""a\"b" "back\\slash""#);

        assert_eq!(lex.next(), Some(DatalogToken::Str("a\"b".to_string())));
        assert_eq!(lex.next(), Some(DatalogToken::Str("back\\slash".to_string())));
    }

    #[test]
    fn test_comments_are_skipped() {
        let mut lex = DatalogToken::lexer("// line\nE(1). /* block */ F(2).");

        assert_eq!(lex.next(), Some(DatalogToken::Ident("E")));
        assert_eq!(lex.next(), Some(DatalogToken::LParen));
        assert_eq!(lex.next(), Some(DatalogToken::Number(1)));
    }

    #[test]
    fn test_comparison_tokens_are_longest_match() {
        let mut lex = DatalogToken::lexer("x <= y != z");

        assert_eq!(lex.next(), Some(DatalogToken::Ident("x")));
        assert_eq!(lex.next(), Some(DatalogToken::Le));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("y")));
        assert_eq!(lex.next(), Some(DatalogToken::Ne));
        assert_eq!(lex.next(), Some(DatalogToken::Ident("z")));
    }
}
