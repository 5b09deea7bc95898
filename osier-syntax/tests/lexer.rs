//! Lexer table and round-trip coverage.

use quickcheck_macros::quickcheck;
use rstest::rstest;

use osier_syntax::{tokenize, TokenTag};

#[rstest]
#[case("+", TokenTag::OpAdd)]
#[case("+=", TokenTag::SetAdd)]
#[case("-", TokenTag::OpSub)]
#[case("-=", TokenTag::SetSub)]
#[case("->", TokenTag::ArrowRight)]
#[case("*", TokenTag::OpMulOrPtr)]
#[case("*=", TokenTag::SetMul)]
#[case("/", TokenTag::OpDiv)]
#[case("/=", TokenTag::SetDiv)]
#[case("%", TokenTag::OpMod)]
#[case("%=", TokenTag::SetMod)]
#[case("&", TokenTag::OpBitAndOrRef)]
#[case("&&", TokenTag::OpLogAnd)]
#[case("&=", TokenTag::SetBitAnd)]
#[case("|", TokenTag::OpBitOr)]
#[case("||", TokenTag::OpLogOr)]
#[case("|=", TokenTag::SetBitOr)]
#[case("^", TokenTag::OpBitXor)]
#[case("^=", TokenTag::SetBitXor)]
#[case("<", TokenTag::OpCmpLt)]
#[case("<=", TokenTag::OpCmpLe)]
#[case("<<", TokenTag::OpShiftLeft)]
#[case("<<=", TokenTag::SetShiftLeft)]
#[case("<-", TokenTag::ArrowLeft)]
#[case(">", TokenTag::OpCmpGt)]
#[case(">=", TokenTag::OpCmpGe)]
#[case(">>", TokenTag::OpShiftRight)]
#[case(">>=", TokenTag::SetShiftRight)]
#[case("=", TokenTag::Set)]
#[case("==", TokenTag::OpCmpEq)]
#[case("=>", TokenTag::FatArrowRight)]
#[case("!", TokenTag::UOpLogNot)]
#[case("!=", TokenTag::OpCmpNe)]
#[case("~", TokenTag::UOpBitNot)]
#[case("$", TokenTag::UOpDeref)]
#[case(".", TokenTag::Dot)]
#[case("...", TokenTag::TripleDot)]
#[case(":", TokenTag::Colon)]
#[case("::", TokenTag::DoubleColon)]
#[case(";", TokenTag::Semicolon)]
#[case(",", TokenTag::Comma)]
#[case("#", TokenTag::Hashtag)]
#[case("{", TokenTag::CurlyBeg)]
#[case("}", TokenTag::CurlyEnd)]
#[case("[", TokenTag::BracketBeg)]
#[case("]", TokenTag::BracketEnd)]
#[case("(", TokenTag::ParenBeg)]
#[case(")", TokenTag::ParenEnd)]
fn operator_lexemes_map_to_their_tags(#[case] lexeme: &str, #[case] expected: TokenTag) {
    let tokens = tokenize(lexeme.as_bytes(), false);

    assert_eq!(tokens.len(), 1, "{lexeme:?} should be a single token");
    assert_eq!(tokens[0].tag, expected);
    assert_eq!(tokens[0].bytes(lexeme.as_bytes()), lexeme.as_bytes());
}

#[rstest]
#[case("if", TokenTag::If)]
#[case("then", TokenTag::Then)]
#[case("else", TokenTag::Else)]
#[case("for", TokenTag::For)]
#[case("do", TokenTag::Do)]
#[case("break", TokenTag::Break)]
#[case("finally", TokenTag::Finally)]
#[case("switch", TokenTag::Switch)]
#[case("case", TokenTag::Case)]
#[case("return", TokenTag::Return)]
#[case("defer", TokenTag::Defer)]
#[case("proc", TokenTag::Proc)]
#[case("func", TokenTag::Func)]
#[case("trait", TokenTag::Trait)]
#[case("module", TokenTag::Module)]
#[case("impl", TokenTag::Impl)]
#[case("mut", TokenTag::Mut)]
#[case("pub", TokenTag::Pub)]
#[case("catch", TokenTag::Catch)]
#[case("try", TokenTag::Try)]
#[case("undefined", TokenTag::Undefined)]
fn reserved_words_map_to_their_tags(#[case] word: &str, #[case] expected: TokenTag) {
    let tokens = tokenize(word.as_bytes(), false);

    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].tag, expected);

    // A reserved word with a trailing name character is an identifier again.
    let extended = format!("{word}x");
    let tokens = tokenize(extended.as_bytes(), false);

    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].tag, TokenTag::Ident);
}

/// Maps arbitrary bytes into the quote-free printable subset so that token
/// ranges always tile the source exactly.
fn sanitize(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .map(|&b| match b {
            0 | b'"' | b'\'' | b'\\' | b'/' => b' ',
            0x20..=0x7e => b,
            b'\n' | b'\t' => b,
            _ => b' ',
        })
        .collect()
}

#[quickcheck]
fn token_ranges_tile_the_source(input: Vec<u8>) -> bool {
    let source = sanitize(&input);
    let tokens = tokenize(&source, true);

    // Concatenating every token's bytes with the skipped whitespace between
    // them reproduces the source.
    let mut rebuilt = Vec::new();
    let mut cursor = 0usize;

    for t in &tokens {
        let (b, e) = (t.range.begin as usize, t.range.end as usize);

        if b < cursor || e > source.len() {
            return false;
        }

        rebuilt.extend_from_slice(&source[cursor..b]);
        rebuilt.extend_from_slice(&source[b..e]);
        cursor = e;
    }

    rebuilt.extend_from_slice(&source[cursor..]);

    rebuilt == source
}

#[quickcheck]
fn lexing_is_deterministic(input: Vec<u8>) -> bool {
    let source = sanitize(&input);

    tokenize(&source, true) == tokenize(&source, true)
}
