use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::Serialize;

use crate::error::AnimateError;

pub const DEFAULT_HEADER_LAYOUT: &str = "large-font";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderLayout {
    Studio,
    NoChrome,
    LargeFont,
    CollapseDatetime,
    NoFolder,
    NoTitle,
    NoDatetime,
}

const LAYOUT_TOKENS: &[(&str, HeaderLayout)] = &[
    ("studio", HeaderLayout::Studio),
    ("no-chrome", HeaderLayout::NoChrome),
    ("large-font", HeaderLayout::LargeFont),
    ("collapse-datetime", HeaderLayout::CollapseDatetime),
    ("no-folder", HeaderLayout::NoFolder),
    ("no-title", HeaderLayout::NoTitle),
    ("no-datetime", HeaderLayout::NoDatetime),
];

impl HeaderLayout {
    pub fn token(self) -> &'static str {
        LAYOUT_TOKENS
            .iter()
            .find(|(_, layout)| *layout == self)
            .map_or("", |(token, _)| *token)
    }

    /// Aggregates expand into their members; everything else maps to itself.
    fn expand(self) -> &'static [HeaderLayout] {
        match self {
            Self::Studio => &[Self::NoChrome, Self::LargeFont, Self::CollapseDatetime],
            Self::NoChrome => &[Self::NoChrome],
            Self::LargeFont => &[Self::LargeFont],
            Self::CollapseDatetime => &[Self::CollapseDatetime],
            Self::NoFolder => &[Self::NoFolder],
            Self::NoTitle => &[Self::NoTitle],
            Self::NoDatetime => &[Self::NoDatetime],
        }
    }
}

impl FromStr for HeaderLayout {
    type Err = AnimateError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().to_ascii_lowercase();
        LAYOUT_TOKENS
            .iter()
            .find(|(token, _)| *token == value)
            .map(|(_, layout)| *layout)
            .ok_or_else(|| {
                let accepted = LAYOUT_TOKENS
                    .iter()
                    .map(|(token, _)| *token)
                    .collect::<Vec<_>>()
                    .join(", ");
                AnimateError::configuration(format!(
                    "unknown header layout '{raw}' (accepted: {accepted})"
                ))
            })
    }
}

impl fmt::Display for HeaderLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Resolved UI amendments. Built once per run; drivers read fields, never tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HeaderDirectives {
    /// Kiosk presentation without side navigation.
    pub kiosk: bool,
    pub large_font: bool,
    pub collapse_datetime: bool,
    pub hide_folder: bool,
    pub hide_title: bool,
    pub hide_datetime: bool,
}

impl HeaderDirectives {
    pub fn resolve(layouts: &[HeaderLayout]) -> Self {
        let effective = layouts
            .iter()
            .flat_map(|layout| layout.expand().iter().copied())
            .collect::<BTreeSet<_>>();

        // Directives are independent; one that targets a removed widget is simply inert.
        let mut directives = Self::default();
        for layout in effective {
            match layout {
                HeaderLayout::NoChrome => directives.kiosk = true,
                HeaderLayout::LargeFont => directives.large_font = true,
                HeaderLayout::CollapseDatetime => directives.collapse_datetime = true,
                HeaderLayout::NoFolder => directives.hide_folder = true,
                HeaderLayout::NoTitle => directives.hide_title = true,
                HeaderLayout::NoDatetime => directives.hide_datetime = true,
                HeaderLayout::Studio => {}
            }
        }
        directives
    }

    /// Parse free-form tokens (repeatable, comma separated) and resolve them.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        let layouts = parse_layout_tokens(tokens)?;
        Ok(Self::resolve(&layouts))
    }

    /// Whether the injected header script has anything to do.
    pub fn amends_header(&self) -> bool {
        self.large_font
            || self.collapse_datetime
            || self.hide_folder
            || self.hide_title
            || self.hide_datetime
    }
}

pub fn parse_layout_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<HeaderLayout>> {
    let mut layouts = Vec::new();
    for token in tokens {
        for part in token.as_ref().split(',') {
            if part.trim().is_empty() {
                continue;
            }
            layouts.push(part.parse::<HeaderLayout>()?);
        }
    }
    Ok(layouts)
}
