//! Glob-style request path patterns
//!
//! `*` matches any run of characters inside one path segment, `**` matches
//! across segments. Everything else is literal.

use std::fmt;

/// Upper bound on backtracking steps for a single match
const MAX_MATCH_STEPS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// `*`
    Segment,
    /// `**`
    Any,
}

/// A compiled path pattern
#[derive(Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    tokens: Vec<Token>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            tokens: compile(pattern),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let (matched, steps) = self.match_counting(path);
        if !matched && steps >= MAX_MATCH_STEPS {
            tracing::warn!(
                "Path pattern {} exceeded {} steps on {}, treating as no match",
                self.source,
                MAX_MATCH_STEPS,
                path
            );
        }
        matched
    }

    fn match_counting(&self, path: &str) -> (bool, usize) {
        let mut steps = 0;
        let matched = match_from(&self.tokens, path, &mut steps);
        (matched, steps)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathPattern({:?})", self.source)
    }
}

fn compile(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '*' {
            literal.push(ch);
            continue;
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            // Collapse runs like `***` into a single `**`
            while chars.peek() == Some(&'*') {
                chars.next();
            }
            tokens.push(Token::Any);
        } else {
            tokens.push(Token::Segment);
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Once the step budget is spent every pending branch fails immediately
fn match_from(tokens: &[Token], path: &str, steps: &mut usize) -> bool {
    if *steps >= MAX_MATCH_STEPS {
        return false;
    }
    *steps += 1;

    let Some((token, rest)) = tokens.split_first() else {
        return path.is_empty();
    };

    match token {
        Token::Literal(lit) => path
            .strip_prefix(lit.as_str())
            .is_some_and(|remaining| match_from(rest, remaining, steps)),
        Token::Segment => {
            let limit = path.find('/').unwrap_or(path.len());
            (0..=limit)
                .filter(|i| path.is_char_boundary(*i))
                .any(|i| match_from(rest, &path[i..], steps))
        }
        Token::Any => {
            if rest.is_empty() {
                return true;
            }
            (0..=path.len())
                .filter(|i| path.is_char_boundary(*i))
                .any(|i| match_from(rest, &path[i..], steps))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let pattern = PathPattern::new("/index.html");
        assert!(pattern.matches("/index.html"));
        assert!(!pattern.matches("/index.htm"));
        assert!(!pattern.matches("/index.html/extra"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let pattern = PathPattern::new("/assets/*.js");
        assert!(pattern.matches("/assets/app.js"));
        assert!(pattern.matches("/assets/.js"));
        assert!(!pattern.matches("/assets/vendor/app.js"));
        assert!(!pattern.matches("/assets/app.css"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        let pattern = PathPattern::new("/api/**");
        assert!(pattern.matches("/api/tasks"));
        assert!(pattern.matches("/api/tasks/42/notes"));
        assert!(pattern.matches("/api/"));
        assert!(!pattern.matches("/apis/tasks"));

        let by_extension = PathPattern::new("**.woff2");
        assert!(by_extension.matches("/fonts/inter/inter.woff2"));
        assert!(!by_extension.matches("/fonts/inter.woff"));
    }

    #[test]
    fn test_catch_all() {
        let pattern = PathPattern::new("**");
        assert!(pattern.matches("/"));
        assert!(pattern.matches(""));
        assert!(pattern.matches("/deep/nested/path"));
    }

    #[test]
    fn test_pathological_pattern_terminates() {
        let pattern = PathPattern::new("/**a**a**a**a**a**b");
        let path = format!("/{}", "a".repeat(64));
        assert!(!pattern.matches(&path));
    }

    #[test]
    fn test_step_budget_is_a_hard_cap() {
        let pattern = PathPattern::new("/**a**a**a**a**a**b");
        let path = format!("/{}", "a".repeat(64));
        let (matched, steps) = pattern.match_counting(&path);
        assert!(!matched);
        assert_eq!(steps, MAX_MATCH_STEPS);

        let (matched, steps) = PathPattern::new("/api/**").match_counting("/api/tasks");
        assert!(matched);
        assert!(steps < 10);
    }
}
