//! Ordered, case-insensitive name/value set.
//!
//! `Options` carries HTTP headers on requests and responses, and the
//! configuration handed to `connect` on clients and listeners.

use std::fmt;

/// Protocol selection: one of `HTTP/1.0`, `HTTP/1.1`, `HTTP/2`,
/// `HTTPS/1.0`, `HTTPS/1.1`, `HTTPS/2`.
pub const PROTOCOL: &str = "PROTOCOL";
/// Certificate file for encrypted listeners.
pub const CERT_FILE: &str = "CERT-FILE";
/// Private key file for encrypted listeners.
pub const KEY_FILE: &str = "KEY-FILE";
/// Whether HTTP/1 is accepted when HTTP/2 is selected.
pub const HTTP1_ALLOWED: &str = "HTTP1-ALLOWED";

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONNECTION: &str = "Connection";
pub const HOST: &str = "Host";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    entries: Vec<(String, String)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Looks up a value by name, ignoring ASCII case.
    pub fn locate(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Like [`locate`](Self::locate), falling back to `default`.
    pub fn locate_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.locate(name).unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Sets `name` to `value`, replacing any entry with the same name.
    ///
    /// A replaced entry loses its position; the new pair goes last.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(i) = self.position(&name) {
            self.entries.remove(i);
        }
        self.entries.push((name, value.into()));
    }

    /// Removes the entry for `name`, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Inserts every pair of `other`, replacing same-named entries.
    pub fn append(&mut self, other: &Options) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Options::new();
        options.extend(iter);
        options
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Options {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
