//! Named connections between nodes.

use std::fmt;
use std::str::FromStr;

use crate::errors::GraphError;

/// Reference to one slot of a node: `name` or `name(index)`.
///
/// Used both for input connections (producer name and output slot) and for
/// output connections (consumer name and input slot).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    name: String,
    index: usize,
}

impl Connection {
    pub fn new(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl FromStr for Connection {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || GraphError::config(format!("invalid connection '{s}'"));

        let (name, index) = match s.split_once('(') {
            Some((name, rest)) => {
                let digits = rest.strip_suffix(')').ok_or_else(invalid)?;
                let index = digits.trim().parse::<usize>().map_err(|_| invalid())?;
                (name.trim(), index)
            }
            None => (s, 0),
        };

        if name.is_empty() || name.contains(')') || name.contains(',') {
            return Err(invalid());
        }
        Ok(Self::new(name, index))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}({})", self.name, self.index)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_name() {
        let conn: Connection = "fc1".parse().unwrap();
        assert_eq!(conn.name(), "fc1");
        assert_eq!(conn.index(), 0);
    }

    #[test]
    fn test_parse_indexed_name() {
        let conn: Connection = "split(2)".parse().unwrap();
        assert_eq!(conn.name(), "split");
        assert_eq!(conn.index(), 2);
        assert_eq!(conn.to_string(), "split(2)");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<Connection>().is_err());
        assert!("a(x)".parse::<Connection>().is_err());
        assert!("a(1".parse::<Connection>().is_err());
        assert!("(1)".parse::<Connection>().is_err());
    }
}
