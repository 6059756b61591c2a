//! Thumbnail page selection.
//!
//! Slides usually carry a ready-made low-resolution page: a reduced-resolution
//! directory or, for Aperio files, the untiled second directory. When none is
//! flagged, the smallest non-auxiliary page is used and scaled down.

use serde::Serialize;

use super::tiff::{DirectoryIndex, Ifd};

/// Marker in Aperio ImageDescription strings.
pub const APERIO_SIGNATURE: &str = "Aperio";

/// Description needles of auxiliary photographs that never serve as thumbnails.
const AUXILIARY_NEEDLES: &[&str] = &["label", "macro"];

/// How a candidate page was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// The file marks this page as a reduced-resolution copy
    Explicit,
    /// No marked page; the smallest page is scaled down instead
    Synthesized,
}

/// The page chosen as the thumbnail source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThumbnailCandidate {
    pub page_index: usize,
    pub kind: CandidateKind,
}

/// Whether the page's description names it a label or macro photo.
pub fn is_auxiliary(ifd: &Ifd) -> bool {
    ifd.description().is_some_and(|desc| {
        let desc = desc.to_ascii_lowercase();
        AUXILIARY_NEEDLES.iter().any(|needle| desc.contains(needle))
    })
}

/// Aperio convention: page 1 is a strip-organized thumbnail of page 0.
fn is_aperio_thumbnail(index: &DirectoryIndex, ifd: &Ifd) -> bool {
    if ifd.page_index != 1 || ifd.is_tiled() {
        return false;
    }
    let signed = ifd
        .description()
        .is_some_and(|desc| desc.starts_with(APERIO_SIGNATURE));
    let smaller = match (index.page(0).and_then(Ifd::dimensions), ifd.dimensions()) {
        (Some((base_w, _)), Some((w, _))) => w < base_w,
        _ => false,
    };
    signed && smaller
}

fn is_explicit(index: &DirectoryIndex, ifd: &Ifd) -> bool {
    ifd.dimensions().is_some()
        && (ifd.is_reduced_resolution() || is_aperio_thumbnail(index, ifd))
}

/// Smallest positive width among `pages`, ties to the lowest page index.
fn smallest<'a>(pages: impl Iterator<Item = &'a Ifd>) -> Option<&'a Ifd> {
    pages
        .filter_map(|ifd| ifd.dimensions().map(|(w, _)| (w, ifd.page_index, ifd)))
        .min_by_key(|&(w, page_index, _)| (w, page_index))
        .map(|(_, _, ifd)| ifd)
}

/// Choose the page to render as a thumbnail.
///
/// Returns `None` only when no page has positive dimensions.
pub fn select(index: &DirectoryIndex) -> Option<ThumbnailCandidate> {
    let eligible: Vec<&Ifd> = index.pages().iter().filter(|ifd| !is_auxiliary(ifd)).collect();

    // Pyramids often flag every downsampled level; take the smallest
    let explicit = smallest(eligible.iter().copied().filter(|ifd| is_explicit(index, ifd)));
    if let Some(ifd) = explicit {
        return Some(ThumbnailCandidate {
            page_index: ifd.page_index,
            kind: CandidateKind::Explicit,
        });
    }

    let fallback = if eligible.is_empty() {
        smallest(index.pages().iter())
    } else {
        smallest(eligible.into_iter())
    };
    fallback.map(|ifd| ThumbnailCandidate {
        page_index: ifd.page_index,
        kind: CandidateKind::Synthesized,
    })
}
