//! Slide metadata: base dimensions, microns per pixel, objective power and vendor.
//!
//! Vendors are recognised through a table of rules rather than per-vendor
//! code paths. Each rule names the tag fields and needles that identify the
//! scanner, and where that scanner records magnification and pixel size.

use serde::Serialize;

use super::select::is_auxiliary;
use super::tiff::{DirectoryIndex, Ifd, ResolutionUnit, TiffTag};

/// Vendor label when no rule matches.
pub const UNKNOWN_VENDOR: &str = "unknown";

/// Physical description of a slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideMetadata {
    pub width: u32,
    pub height: u32,
    /// Microns per pixel at full resolution
    pub mpp: Option<f64>,
    pub objective_power: Option<f64>,
    pub vendor: String,
}

/// Tag field a vendor signature is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Description,
    Software,
    Make,
}

impl Field {
    fn tag(self) -> TiffTag {
        match self {
            Field::Description => TiffTag::ImageDescription,
            Field::Software => TiffTag::Software,
            Field::Make => TiffTag::Make,
        }
    }
}

/// Where a numeric property is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    /// Not recorded in a form we read
    Absent,
    /// `key <separator> number` inside the description, value optionally quoted
    KeyValue { key: &'static str, separator: char },
    /// First value of a numeric tag
    Tag(TiffTag),
}

/// How to recognise one scanner vendor and read its properties.
#[derive(Debug, Clone, Copy)]
pub struct VendorRule {
    pub name: &'static str,
    /// Any `(field, needle)` match identifies the vendor; needles are lowercase
    pub signatures: &'static [(Field, &'static str)],
    pub objective_power: ValueRule,
    pub mpp: ValueRule,
}

/// Known vendors, tried in order; the first match wins.
pub const VENDOR_RULES: &[VendorRule] = &[
    VendorRule {
        name: "aperio",
        signatures: &[(Field::Description, "aperio"), (Field::Software, "aperio")],
        objective_power: ValueRule::KeyValue {
            key: "AppMag",
            separator: '=',
        },
        mpp: ValueRule::KeyValue {
            key: "MPP",
            separator: '=',
        },
    },
    VendorRule {
        name: "hamamatsu",
        signatures: &[(Field::Make, "hamamatsu")],
        objective_power: ValueRule::Tag(TiffTag::NdpiMagnification),
        mpp: ValueRule::Absent,
    },
    VendorRule {
        name: "leica",
        signatures: &[(Field::Description, "leica"), (Field::Make, "leica")],
        // Objective lives in an XML element, not a key-value pair
        objective_power: ValueRule::Absent,
        mpp: ValueRule::Absent,
    },
    VendorRule {
        name: "ventana",
        signatures: &[
            (Field::Description, "ventana"),
            (Field::Description, "iscan"),
            (Field::Make, "ventana"),
        ],
        objective_power: ValueRule::KeyValue {
            key: "Magnification",
            separator: '=',
        },
        mpp: ValueRule::KeyValue {
            key: "ScanRes",
            separator: '=',
        },
    },
    VendorRule {
        name: "philips",
        signatures: &[(Field::Software, "philips")],
        objective_power: ValueRule::Absent,
        mpp: ValueRule::Absent,
    },
];

impl VendorRule {
    fn matches(&self, ifd: &Ifd) -> bool {
        self.signatures.iter().any(|&(field, needle)| {
            ifd.text(field.tag())
                .is_some_and(|text| text.to_ascii_lowercase().contains(needle))
        })
    }
}

impl ValueRule {
    /// Positive finite value recorded on `ifd`, if any.
    fn read(&self, ifd: &Ifd) -> Option<f64> {
        let value = match *self {
            ValueRule::Absent => None,
            ValueRule::KeyValue { key, separator } => ifd
                .description()
                .and_then(|desc| key_value_number(desc, key, separator)),
            ValueRule::Tag(tag) => ifd.f64_value(tag),
        };
        value.filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Find `key`, optional whitespace, `separator`, optional whitespace or
/// quote, then a decimal number.
pub fn key_value_number(text: &str, key: &str, separator: char) -> Option<f64> {
    let mut search = text;
    while let Some(at) = search.find(key) {
        let rest = search[at + key.len()..].trim_start();
        if let Some(rest) = rest.strip_prefix(separator) {
            let rest = rest.trim_start().trim_start_matches(['"', '\'']);
            let end = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(rest.len());
            if let Ok(value) = rest[..end].parse::<f64>() {
                return Some(value);
            }
        }
        search = &search[at + key.len()..];
    }
    None
}

/// First full-resolution image page, or page 0.
pub fn base_page(index: &DirectoryIndex) -> Option<&Ifd> {
    index
        .pages()
        .iter()
        .find(|ifd| !ifd.is_reduced_resolution() && !is_auxiliary(ifd) && ifd.dimensions().is_some())
        .or_else(|| index.page(0))
}

/// Microns per pixel from XResolution and ResolutionUnit.
fn resolution_mpp(ifd: &Ifd) -> Option<f64> {
    let unit = ifd
        .u64_value(TiffTag::ResolutionUnit)
        .and_then(|v| u16::try_from(v).ok())
        .and_then(ResolutionUnit::from_u16)?;
    let microns = unit.microns()?;
    let xres = ifd.f64_value(TiffTag::XResolution)?;
    (xres.is_finite() && xres > 0.0).then(|| microns / xres)
}

/// Extract slide metadata. Never fails; missing properties are `None`.
pub fn extract(index: &DirectoryIndex) -> SlideMetadata {
    let Some(base) = base_page(index) else {
        return SlideMetadata {
            width: 0,
            height: 0,
            mpp: None,
            objective_power: None,
            vendor: UNKNOWN_VENDOR.to_string(),
        };
    };

    let rule = VENDOR_RULES.iter().find(|rule| rule.matches(base));
    let vendor_mpp = rule.and_then(|r| r.mpp.read(base));
    let objective_power = rule.and_then(|r| r.objective_power.read(base));

    SlideMetadata {
        width: base.width().unwrap_or(0),
        height: base.height().unwrap_or(0),
        mpp: vendor_mpp.or_else(|| resolution_mpp(base)),
        objective_power,
        vendor: rule.map_or(UNKNOWN_VENDOR, |r| r.name).to_string(),
    }
}
