//! Open and export options handed to the document engine.
//!
//! The enumerations mirror the PowerPoint fixed-format export constants; each
//! variant keeps its Office numeric code so engines speaking the native
//! automation interface can pass them through unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Office tri-state flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    True,
    False,
    Mixed,
    Toggle,
}

impl TriState {
    pub fn code(self) -> i32 {
        match self {
            TriState::True => -1,
            TriState::False => 0,
            TriState::Mixed => -2,
            TriState::Toggle => -3,
        }
    }

    pub fn is_true(self) -> bool {
        self == TriState::True
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }
}

/// Flags passed when opening a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub read_only: TriState,
    pub untitled: TriState,
    pub with_window: TriState,
}

impl OpenOptions {
    /// Read-only, titled, no window. The engine must never show UI or prompt.
    pub fn headless() -> Self {
        Self {
            read_only: TriState::True,
            untitled: TriState::False,
            with_window: TriState::False,
        }
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::headless()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedFormatType {
    Xps,
    #[default]
    Pdf,
}

impl FixedFormatType {
    pub fn code(self) -> i32 {
        match self {
            FixedFormatType::Xps => 1,
            FixedFormatType::Pdf => 2,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FixedFormatType::Xps => "xps",
            FixedFormatType::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FixedFormatType::Xps => "application/vnd.ms-xpsdocument",
            FixedFormatType::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for FixedFormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedFormatIntent {
    #[default]
    Screen,
    Print,
}

impl FixedFormatIntent {
    pub fn code(self) -> i32 {
        match self {
            FixedFormatIntent::Screen => 1,
            FixedFormatIntent::Print => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoutOrder {
    #[default]
    VerticalFirst,
    HorizontalFirst,
}

impl HandoutOrder {
    pub fn code(self) -> i32 {
        match self {
            HandoutOrder::VerticalFirst => 1,
            HandoutOrder::HorizontalFirst => 2,
        }
    }
}

/// Which component of the presentation is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    #[default]
    Slides,
    TwoSlideHandouts,
    ThreeSlideHandouts,
    SixSlideHandouts,
    NotesPages,
    Outline,
    BuildSlides,
    FourSlideHandouts,
    NineSlideHandouts,
    OneSlideHandouts,
}

impl OutputType {
    pub fn code(self) -> i32 {
        match self {
            OutputType::Slides => 1,
            OutputType::TwoSlideHandouts => 2,
            OutputType::ThreeSlideHandouts => 3,
            OutputType::SixSlideHandouts => 4,
            OutputType::NotesPages => 5,
            OutputType::Outline => 6,
            OutputType::BuildSlides => 7,
            OutputType::FourSlideHandouts => 8,
            OutputType::NineSlideHandouts => 9,
            OutputType::OneSlideHandouts => 10,
        }
    }

    pub fn is_handout(self) -> bool {
        matches!(
            self,
            OutputType::OneSlideHandouts
                | OutputType::TwoSlideHandouts
                | OutputType::ThreeSlideHandouts
                | OutputType::FourSlideHandouts
                | OutputType::SixSlideHandouts
                | OutputType::NineSlideHandouts
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeType {
    #[default]
    All,
    Selection,
    Current,
    SlideRange,
    NamedSlideShow,
}

impl RangeType {
    pub fn code(self) -> i32 {
        match self {
            RangeType::All => 1,
            RangeType::Selection => 2,
            RangeType::Current => 3,
            RangeType::SlideRange => 4,
            RangeType::NamedSlideShow => 5,
        }
    }
}

/// Inclusive, 1-based slide range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("range_type slide_range requires print_range")]
    MissingPrintRange,

    #[error("invalid print_range {start}-{end}: slides are numbered from 1 and start must not exceed end")]
    InvalidPrintRange { start: u32, end: u32 },

    #[error("range_type named_slide_show requires a non-empty slide_show_name")]
    MissingSlideShowName,
}

/// Static export parameters applied to every conversion.
///
/// The defaults favour export reliability and small output over fidelity:
/// no IRM settings, no structure tags, no bitmapped fallback fonts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfiguration {
    pub fixed_format_type: FixedFormatType,
    pub intent: FixedFormatIntent,
    pub frame_slides: bool,
    pub handout_order: HandoutOrder,
    pub output_type: OutputType,
    pub print_hidden_slides: bool,
    pub print_range: Option<PrintRange>,
    pub range_type: RangeType,
    pub slide_show_name: Option<String>,
    pub include_doc_properties: bool,
    pub keep_irm_settings: bool,
    pub doc_structure_tags: bool,
    pub bitmap_missing_fonts: bool,
    pub use_iso19005_1: bool,
    pub include_markup: bool,
}

impl Default for ExportConfiguration {
    fn default() -> Self {
        Self {
            fixed_format_type: FixedFormatType::Pdf,
            intent: FixedFormatIntent::Screen,
            frame_slides: false,
            handout_order: HandoutOrder::VerticalFirst,
            output_type: OutputType::Slides,
            print_hidden_slides: false,
            print_range: None,
            range_type: RangeType::All,
            slide_show_name: None,
            include_doc_properties: false,
            keep_irm_settings: false,
            doc_structure_tags: false,
            bitmap_missing_fonts: false,
            use_iso19005_1: false,
            include_markup: false,
        }
    }
}

impl ExportConfiguration {
    /// Rejects field combinations the engine could not honour.
    pub fn validate(&self) -> Result<(), OptionsError> {
        match self.range_type {
            RangeType::SlideRange => {
                let range = self.print_range.ok_or(OptionsError::MissingPrintRange)?;
                if range.start == 0 || range.start > range.end {
                    return Err(OptionsError::InvalidPrintRange {
                        start: range.start,
                        end: range.end,
                    });
                }
            }
            RangeType::NamedSlideShow => {
                let named = self
                    .slide_show_name
                    .as_deref()
                    .is_some_and(|name| !name.trim().is_empty());
                if !named {
                    return Err(OptionsError::MissingSlideShowName);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn file_extension(&self) -> &'static str {
        self.fixed_format_type.extension()
    }

    pub fn content_type(&self) -> &'static str {
        self.fixed_format_type.content_type()
    }
}
