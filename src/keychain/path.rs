//! Derivation path parsing and validation.
//!
//! Canonical form is `m/purpose'/coin'/account'/change/index`. Parsing is
//! purely syntactic and happens before any cryptographic work; purpose
//! checks live in [`crate::types::ScriptType::from_purpose`].

use std::fmt;

use crate::error::{WalletError, WalletResult};

/// Hardened offset for BIP-32 derivation.
pub const HARDENED: u32 = 0x8000_0000;

/// Single component of a derivation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathComponent {
    pub index: u32,
    pub hardened: bool,
}

impl PathComponent {
    pub fn new(index: u32, hardened: bool) -> Self {
        Self { index, hardened }
    }

    /// Full index including the hardened bit.
    pub fn full_index(&self) -> u32 {
        if self.hardened {
            self.index | HARDENED
        } else {
            self.index
        }
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// A parsed derivation path with the five standard fields broken out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub components: Vec<PathComponent>,
    pub purpose: Option<u32>,
    pub coin_type: Option<u32>,
    pub account: Option<u32>,
    pub change: Option<u32>,
    pub address_index: Option<u32>,
}

impl fmt::Display for ParsedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl ParsedPath {
    /// The purpose field, required for script-type inference.
    pub fn require_purpose(&self) -> WalletResult<u32> {
        self.purpose.ok_or_else(|| {
            WalletError::InvalidDerivationPath("path has no purpose field".into())
        })
    }
}

/// Parse a derivation path string.
pub fn parse_path(path: &str) -> WalletResult<ParsedPath> {
    let trimmed = path.trim();

    if !trimmed.starts_with("m/") && !trimmed.starts_with("M/") {
        return Err(WalletError::InvalidDerivationPath(format!(
            "'{}' must start with m/",
            path
        )));
    }

    let path_part = &trimmed[2..];
    if path_part.is_empty() {
        return Err(WalletError::InvalidDerivationPath("empty path".into()));
    }

    let mut components = Vec::new();
    for component_str in path_part.split('/') {
        components.push(parse_component(component_str)?);
    }

    let purpose = components.first().map(|c| c.index);
    let coin_type = components.get(1).map(|c| c.index);
    let account = components.get(2).map(|c| c.index);
    let change = components.get(3).map(|c| c.index);
    let address_index = components.get(4).map(|c| c.index);

    Ok(ParsedPath {
        components,
        purpose,
        coin_type,
        account,
        change,
        address_index,
    })
}

fn parse_component(s: &str) -> WalletResult<PathComponent> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        return Err(WalletError::InvalidDerivationPath(
            "empty path component".into(),
        ));
    }

    let (number_str, hardened) =
        if trimmed.ends_with('\'') || trimmed.ends_with('h') || trimmed.ends_with('H') {
            (&trimmed[..trimmed.len() - 1], true)
        } else {
            (trimmed, false)
        };

    let index: u32 = number_str.parse().map_err(|_| {
        WalletError::InvalidDerivationPath(format!("invalid component '{}'", s))
    })?;

    // The hardened bit is expressed with ', never numerically.
    if index >= HARDENED {
        return Err(WalletError::InvalidDerivationPath(format!(
            "component {} exceeds maximum value",
            index
        )));
    }

    Ok(PathComponent::new(index, hardened))
}
