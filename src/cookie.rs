//! Cookie support for the opening handshake: the request's single
//! `Cookie:` header parses into a name/value list, and `Cookie` values
//! set by the application serialize into `Set-Cookie:` response header
//! lines per RFC 6265.

use std::fmt;

/// One outgoing `Set-Cookie` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// A cookie with only name/value set; all attributes absent/false.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Cookie {
            name: name.into(),
            value: value.into(),
            max_age: None,
            path: None,
            domain: None,
            secure: false,
            http_only: false,
        }
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", strip_crlf(&self.name), strip_crlf(&self.value))?;
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
        }
        if let Some(ref path) = self.path {
            write!(f, "; Path={}", strip_crlf(path))?;
        }
        if let Some(ref domain) = self.domain {
            write!(f, "; Domain={}", strip_crlf(domain))?;
        }
        if self.secure {
            write!(f, "; Secure")?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        Ok(())
    }
}

/// Drop any `\r`/`\n` from a cookie attribute before it reaches a response
/// header line — these fields can come from application code built out of
/// request-derived data, and a raw CRLF would split the handshake
/// response into attacker-controlled extra headers.
fn strip_crlf(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        std::borrow::Cow::Owned(value.chars().filter(|c| *c != '\r' && *c != '\n').collect())
    } else {
        std::borrow::Cow::Borrowed(value)
    }
}

/// Parse a single `Cookie:` request header value (`name=value; name=value`)
/// into a name→value mapping. Malformed pairs (no `=`) are skipped rather
/// than failing the whole header, matching how browsers are tolerant of
/// stray cookie crumbs.
pub fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_cookies() {
        let parsed = parse_cookie_header("a=1; b=2;c=3");
        assert_eq!(
            parsed,
            vec![("a".into(), "1".into()), ("b".into(), "2".into()), ("c".into(), "3".into())]
        );
    }

    #[test]
    fn skips_malformed_pairs() {
        let parsed = parse_cookie_header("a=1; garbage; b=2");
        assert_eq!(parsed, vec![("a".into(), "1".into()), ("b".into(), "2".into())]);
    }

    #[test]
    fn serializes_minimal_cookie() {
        let cookie = Cookie::new("session", "abc123");
        assert_eq!(cookie.to_string(), "session=abc123");
    }

    #[test]
    fn strips_crlf_from_cookie_fields() {
        let cookie = Cookie::new("session", "abc\r\nX-Injected: evil").with_path("/\r\nY: z");
        let rendered = cookie.to_string();
        assert!(!rendered.contains('\r'));
        assert!(!rendered.contains('\n'));
    }

    #[test]
    fn serializes_full_cookie() {
        let cookie = Cookie::new("session", "abc123")
            .with_max_age(3600)
            .with_path("/")
            .with_domain("example.com")
            .secure()
            .http_only();
        assert_eq!(
            cookie.to_string(),
            "session=abc123; Max-Age=3600; Path=/; Domain=example.com; Secure; HttpOnly"
        );
    }
}
