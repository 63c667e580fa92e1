//! URI template matching for resource routing.
//!
//! Templates use RFC 6570 level-1 `{var}` placeholders. A variable matches a
//! single path segment, except a variable at the very end of the template,
//! which greedily matches the remainder so `file:///{path}` covers nested
//! paths.

use regex::Regex;
use std::collections::HashMap;

use crate::error::{Error, Result};

/// A compiled URI template.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    regex: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compile a template string.
    ///
    /// Fails on unbalanced braces, empty variable names, or duplicate
    /// variables.
    pub fn parse(template: &str) -> Result<Self> {
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            pattern.push_str(&regex::escape(literal));
            let Some(close) = tail.find('}') else {
                return Err(Error::InvalidParams(format!(
                    "unbalanced '{{' in URI template {template}"
                )));
            };
            let name = &tail[1..close];
            if name.is_empty() {
                return Err(Error::InvalidParams(format!(
                    "empty variable in URI template {template}"
                )));
            }
            if variables.iter().any(|v| v == name) {
                return Err(Error::InvalidParams(format!(
                    "duplicate variable {name} in URI template {template}"
                )));
            }
            variables.push(name.to_string());
            rest = &tail[close + 1..];
            if rest.is_empty() {
                // Trailing variable: greedy, so path-like tails match.
                pattern.push_str("(.+)");
            } else {
                pattern.push_str("([^/]+)");
            }
        }
        if rest.contains('}') {
            return Err(Error::InvalidParams(format!(
                "unbalanced '}}' in URI template {template}"
            )));
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| Error::InvalidParams(format!("invalid URI template {template}: {e}")))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            variables,
        })
    }

    /// The original template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Variable names in appearance order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// True when `uri` matches this template.
    pub fn matches(&self, uri: &str) -> bool {
        self.regex.is_match(uri)
    }

    /// Extract variable bindings from a matching URI.
    pub fn extract(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(uri)?;
        let mut out = HashMap::with_capacity(self.variables.len());
        for (i, name) in self.variables.iter().enumerate() {
            out.insert(name.clone(), captures.get(i + 1)?.as_str().to_string());
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_variable() {
        let t = UriTemplate::parse("file:///{path}").unwrap();
        assert!(t.matches("file:///readme.md"));
        assert!(t.matches("file:///docs/guide.md"));
        assert!(!t.matches("db:///users"));

        let vars = t.extract("file:///docs/guide.md").unwrap();
        assert_eq!(vars["path"], "docs/guide.md");
    }

    #[test]
    fn multiple_variables() {
        let t = UriTemplate::parse("db:///{table}/{id}").unwrap();
        assert!(t.matches("db:///users/42"));
        assert!(!t.matches("db:///users"));

        let vars = t.extract("db:///users/42").unwrap();
        assert_eq!(vars["table"], "users");
        assert_eq!(vars["id"], "42");
    }

    #[test]
    fn mid_template_variables_stop_at_slash() {
        let t = UriTemplate::parse("api://{service}/status").unwrap();
        assert!(t.matches("api://billing/status"));
        assert!(!t.matches("api://billing/eu/status"));
    }

    #[test]
    fn literal_templates_match_exactly() {
        let t = UriTemplate::parse("config://app").unwrap();
        assert!(t.matches("config://app"));
        assert!(!t.matches("config://app/extra"));
        assert!(t.extract("config://app").unwrap().is_empty());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(UriTemplate::parse("file:///{path").is_err());
        assert!(UriTemplate::parse("file:///path}").is_err());
        assert!(UriTemplate::parse("file:///{}").is_err());
        assert!(UriTemplate::parse("x://{a}/{a}").is_err());
    }

    #[test]
    fn regex_metacharacters_in_literals_are_escaped() {
        let t = UriTemplate::parse("search://{term}?page=1").unwrap();
        assert!(t.matches("search://rust?page=1"));
        assert!(!t.matches("search://rustXpage=1"));
    }
}
