/*
 * AEVUMDB COMMUNITY LICENSE
 * Version 1.0, February 2026
 *
 * Copyright (c) 2026 Ananda Firmansyah.
 * Official Organization: AevumDB (https://github.com/aevumdb)
 *
 * This source code is licensed under the AevumDB Community License.
 * You may not use this file except in compliance with the License.
 * A copy of the License is located at the root of this repository.
 *
 * UNLESS REQUIRED BY APPLICABLE LAW OR AGREED TO IN WRITING, SOFTWARE
 * DISTRIBUTED UNDER THE LICENSE IS PROVIDED "AS IS", WITHOUT WARRANTY
 * OF ANY KIND, EITHER EXPRESS OR IMPLIED.
 */

//! Regex flag normalization: the reference's
//! Mongo-style flag characters (`i`, `m`, `x`, `s`) get translated into the
//! `regex` crate's inline flag group syntax, and a single helper builds both
//! the "no global" mode `$regexFind` needs and the "global" mode
//! `$regexFindAll` needs, so the two never drift apart.

use regex::Regex;

use crate::error::{AevumError, AevumResult};

/// Builds a `regex::Regex` from a Mongo-style pattern/flags pair.
pub fn build(pattern: &str, flags: &str) -> AevumResult<Regex> {
    let mut inline = String::new();
    for c in flags.chars() {
        match c {
            'i' | 'm' | 's' | 'x' => inline.push(c),
            // 'u' (unicode) is the `regex` crate's default; reference-only
            // flags with no crate equivalent are accepted and ignored.
            _ => {}
        }
    }
    let pattern_with_flags = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", inline, pattern)
    };
    Regex::new(&pattern_with_flags)
        .map_err(|e| AevumError::domain(format!("invalid regular expression: {}", e)))
}

/// The first match only ("no global" mode), used by `$regexFind` and the
/// `$regex` query operator.
pub fn find_first<'a>(re: &Regex, haystack: &'a str) -> Option<regex::Captures<'a>> {
    re.captures(haystack)
}

/// All non-overlapping matches ("global" mode), used by `$regexFindAll`.
pub fn find_all<'a>(re: &Regex, haystack: &'a str) -> Vec<regex::Captures<'a>> {
    re.captures_iter(haystack).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_flag_applies() {
        let re = build("abc", "i").unwrap();
        assert!(re.is_match("ABC"));
    }

    #[test]
    fn find_all_returns_every_match() {
        let re = build("a", "").unwrap();
        let all = find_all(&re, "banana");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn find_first_returns_only_leftmost() {
        let re = build("a", "").unwrap();
        let m = find_first(&re, "banana").unwrap();
        assert_eq!(m.get(0).unwrap().start(), 1);
    }
}
