// Copyright © 2021 strogg developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Console command-line tokenization.
//!
//! A script is a sequence of commands separated by semicolons or newlines;
//! each command is a sequence of tokens separated by blanks. Double quotes
//! group blanks and semicolons into a single token.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::char,
    combinator::map,
    multi::many0,
    sequence::{delimited, preceded},
    IResult,
};

fn blanks(input: &str) -> IResult<&str, &str> {
    take_while(|c| c == ' ' || c == '\t')(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)
}

fn bare(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ';' && c != '"')(input)
}

fn token(input: &str) -> IResult<&str, &str> {
    preceded(blanks, alt((quoted, bare)))(input)
}

fn command(input: &str) -> IResult<&str, Vec<String>> {
    map(many0(token), |tokens| {
        tokens.into_iter().map(String::from).collect()
    })(input)
}

/// Splits a console script into commands, each a list of argument tokens.
///
/// Unterminated quotes swallow the rest of their segment; empty segments are
/// dropped.
pub fn commands(text: &str) -> Vec<Vec<String>> {
    text.split(|c| matches!(c, ';' | '\n' | '\r'))
        .filter_map(|segment| match command(segment) {
            Ok((_, args)) if !args.is_empty() => Some(args),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_command() {
        assert_eq!(commands("screenshot"), vec![vec!["screenshot".to_owned()]]);
    }

    #[test]
    fn test_quoted_args() {
        assert_eq!(
            commands("bind \"mouse 1\" +attack"),
            vec![vec![
                "bind".to_owned(),
                "mouse 1".to_owned(),
                "+attack".to_owned()
            ]]
        );
    }

    #[test]
    fn test_separators() {
        assert_eq!(
            commands("r_bloom 1; r_fxaa 0\nvk_lockpvs 1"),
            vec![
                vec!["r_bloom".to_owned(), "1".to_owned()],
                vec!["r_fxaa".to_owned(), "0".to_owned()],
                vec!["vk_lockpvs".to_owned(), "1".to_owned()],
            ]
        );
    }

    #[test]
    fn test_empty_segments_dropped() {
        assert_eq!(commands(";;\n  \n;"), Vec::<Vec<String>>::new());
    }
}
