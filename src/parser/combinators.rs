use nom::{
    branch::alt,
    bytes::complete::{is_not, take_till},
    character::complete::{char, multispace0},
    multi::{fold_many1, many0},
    sequence::{delimited, preceded},
    IResult,
    Parser,
};

// ── Low-level nom parsers ──────────────────────────────────────────────────

pub fn parse_double_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_till(|c| c == '"'), char('"')).parse(input)
}

pub fn parse_single_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('\''), take_till(|c| c == '\''), char('\'')).parse(input)
}

pub fn parse_bare(input: &str) -> IResult<&str, &str> {
    is_not(" \t\r\n\"'").parse(input)
}

/// One word: adjacent quoted and bare pieces glue together, so
/// `--name="a b"` is the single word `--name=a b`.
pub fn parse_word(input: &str) -> IResult<&str, String> {
    fold_many1(
        alt((parse_double_quoted, parse_single_quoted, parse_bare)),
        String::new,
        |mut word, piece| {
            word.push_str(piece);
            word
        },
    )
    .parse(input)
}

/// Every word of `input`, with surrounding whitespace consumed.
pub fn parse_words(input: &str) -> IResult<&str, Vec<String>> {
    let (rest, words) = many0(preceded(multispace0, parse_word)).parse(input)?;
    let (rest, _) = multispace0(rest)?;
    Ok((rest, words))
}
