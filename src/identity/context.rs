use axum::http::{header, HeaderMap};
use std::collections::HashMap;

/// Raw credential material lifted from an inbound request: cookie pairs, the bearer token,
/// and lower-cased header values.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cookies: Vec<(String, String)>,
    headers: HashMap<String, String>,
    bearer: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut ctx = Self::new();

        for value in headers.get_all(header::COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.split_once('=') {
                    let name = name.trim();
                    if !name.is_empty() {
                        ctx.cookies.push((name.to_string(), value.trim().to_string()));
                    }
                }
            }
        }

        if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Some(token) = value.strip_prefix("Bearer ") {
                let token = token.trim();
                if !token.is_empty() {
                    ctx.bearer = Some(token.to_string());
                }
            }
        }

        for (name, value) in headers {
            if *name == header::COOKIE || *name == header::AUTHORIZATION {
                continue;
            }
            if let Ok(value) = value.to_str() {
                ctx.headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        ctx
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    /// First non-empty cookie with this exact name
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, v)| n == name && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn cookies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer.as_deref()
    }
}
