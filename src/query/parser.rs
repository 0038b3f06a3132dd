//! Label selector parser
//!
//! # Supported Syntax
//!
//! ```text
//! {}
//! {name="value"}
//! {name!="value", other=~"regex", third!~"regex",}
//! ```
//!
//! Label names are `[A-Za-z_][A-Za-z0-9_]*`. Values are double-quoted and
//! support the `\\`, `\"`, `\n` and `\t` escapes. A trailing comma is allowed.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0, one_of},
    combinator::{map, opt, recognize, value},
    multi::{fold_many0, separated_list0},
    sequence::{delimited, pair, preceded},
    IResult,
};

use crate::query::error::{QueryError, QueryResult};
use crate::query::matcher::{MatchType, Matcher};

/// Parse a label selector into matchers
pub fn parse_selector(input: &str) -> QueryResult<Vec<Matcher>> {
    let input = input.trim();

    match parse_braces(input) {
        Ok((remaining, raw)) => {
            if !remaining.trim().is_empty() {
                return Err(QueryError::Parse(format!(
                    "Unexpected input after selector: '{}'",
                    remaining.trim()
                )));
            }
            raw.into_iter()
                .map(|(name, match_type, v)| Matcher::new(match_type, name, v))
                .collect()
        }
        Err(e) => Err(QueryError::Parse(format!("invalid selector {:?}: {:?}", input, e))),
    }
}

type RawMatcher<'a> = (&'a str, MatchType, String);

/// `{` matchers `}`
fn parse_braces(input: &str) -> IResult<&str, Vec<RawMatcher<'_>>> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        parse_matcher,
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char(','))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, matchers))
}

/// Parse a single `name op "value"` matcher
fn parse_matcher(input: &str) -> IResult<&str, RawMatcher<'_>> {
    let (input, name) = parse_identifier(input)?;
    let (input, _) = multispace0(input)?;
    let (input, match_type) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, v) = parse_quoted_string(input)?;
    Ok((input, (name, match_type, v)))
}

/// Parse matcher operator; two-character operators go first
fn parse_operator(input: &str) -> IResult<&str, MatchType> {
    alt((
        value(MatchType::Regex, tag("=~")),
        value(MatchType::NotRegex, tag("!~")),
        value(MatchType::NotEqual, tag("!=")),
        value(MatchType::Equal, tag("=")),
    ))(input)
}

/// Parse label name
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse double-quoted string with escapes
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        fold_many0(
            alt((
                map(is_not("\\\""), str::to_string),
                map(preceded(char('\\'), one_of("\\\"nt")), |c| {
                    match c {
                        'n' => "\n",
                        't' => "\t",
                        '"' => "\"",
                        _ => "\\",
                    }
                    .to_string()
                }),
            )),
            String::new,
            |mut acc, piece| {
                acc.push_str(&piece);
                acc
            },
        ),
        char('"'),
    )(input)
}
