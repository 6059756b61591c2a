//! Container parsing and page selection against built TIFF files.
//!
//! Tests verify:
//! - Classic TIFF and BigTIFF in both byte orders
//! - Explicit (Aperio) and synthesized thumbnail selection
//! - Rejection of non-TIFF input and cyclic directory chains

use wsi_thumbnailer::error::ErrorKind;
use wsi_thumbnailer::format::tiff::DirectoryParser;
use wsi_thumbnailer::format::{extract, select, CandidateKind};
use wsi_thumbnailer::source::RemoteSource;
use wsi_thumbnailer::thumbnail::ThumbnailService;

use super::test_utils::{
    aperio_slide, jpeg_pyramid, png_info, rgb_pattern, small_rgb_slide, ByteOrderType,
    MockSlideSource, TestPage, TiffBuilder, TrackingMockReader,
};

const SLIDE_URL: &str = "https://storage.googleapis.com/slides/case-1/slide.svs";

fn remote() -> RemoteSource {
    RemoteSource::parse(SLIDE_URL).unwrap()
}

fn service_for(data: Vec<u8>) -> ThumbnailService<MockSlideSource> {
    ThumbnailService::new(MockSlideSource::new().with_slide(SLIDE_URL, data))
}

// =============================================================================
// Byte Orders and BigTIFF
// =============================================================================

fn three_page_file(order: ByteOrderType, bigtiff: bool) -> Vec<u8> {
    TiffBuilder::new()
        .with_byte_order(order)
        .with_bigtiff(bigtiff)
        .add_page(TestPage::strips(96, 64))
        .add_page(TestPage::strips(48, 32).reduced())
        .add_page(TestPage::strips(24, 16).reduced())
        .build()
}

#[tokio::test]
async fn test_directory_chain_in_every_variant() {
    let variants = [
        (ByteOrderType::LittleEndian, false),
        (ByteOrderType::BigEndian, false),
        (ByteOrderType::LittleEndian, true),
        (ByteOrderType::BigEndian, true),
    ];

    for (order, bigtiff) in variants {
        let reader = TrackingMockReader::new(three_page_file(order, bigtiff), "mem://variant");
        let index = DirectoryParser::default().parse(&reader).await.unwrap();

        assert_eq!(index.len(), 3, "{:?} bigtiff={}", order, bigtiff);
        assert_eq!(index.header.is_bigtiff, bigtiff);
        let dims: Vec<_> = index.pages().iter().map(|p| p.dimensions()).collect();
        assert_eq!(dims, vec![Some((96, 64)), Some((48, 32)), Some((24, 16))]);

        // Both reduced pages qualify; the smaller one wins
        let candidate = select(&index).unwrap();
        assert_eq!(candidate.page_index, 2);
        assert_eq!(candidate.kind, CandidateKind::Explicit);
    }
}

#[tokio::test]
async fn test_uncompressed_pixels_survive_every_variant() {
    let expected = rgb_pattern(40, 30);

    for (order, bigtiff) in [
        (ByteOrderType::LittleEndian, false),
        (ByteOrderType::BigEndian, true),
    ] {
        let data = TiffBuilder::new()
            .with_byte_order(order)
            .with_bigtiff(bigtiff)
            .add_page(TestPage::strips(40, 30))
            .build();

        let output = service_for(data).thumbnail(&remote(), 64).await.unwrap();
        assert_eq!((output.width, output.height), (40, 30));

        let decoded = image::load_from_memory(&output.png).unwrap().to_rgb8();
        assert_eq!(decoded.as_raw(), expected.as_raw(), "{:?}", order);
    }
}

// =============================================================================
// Thumbnail Selection
// =============================================================================

#[tokio::test]
async fn test_aperio_thumbnail_page_used_as_is() {
    let service = service_for(aperio_slide());

    let output = service.thumbnail(&remote(), 512).await.unwrap();

    assert_eq!(output.candidate.page_index, 1);
    assert_eq!(output.candidate.kind, CandidateKind::Explicit);
    assert_eq!((output.width, output.height), (200, 150));
    assert_eq!(png_info(&output.png), (200, 150, image::ColorType::Rgb8));
}

#[tokio::test]
async fn test_aperio_metadata_from_base_page() {
    let service = service_for(aperio_slide());

    let metadata = service.metadata(&remote()).await.unwrap();

    assert_eq!(metadata.vendor, "aperio");
    assert_eq!((metadata.width, metadata.height), (46000, 32914));
    assert!((metadata.mpp.unwrap() - 0.499).abs() < 1e-9);
    assert_eq!(metadata.objective_power, Some(20.0));
}

#[tokio::test]
async fn test_label_and_macro_never_selected() {
    let data = TiffBuilder::new()
        .add_page(TestPage::strips(64, 48))
        .add_page(TestPage::strips(16, 16).describe("label 387x463"))
        .add_page(TestPage::strips(20, 10).describe("Macro image"))
        .build();
    let reader = TrackingMockReader::new(data, "mem://aux");
    let index = DirectoryParser::default().parse(&reader).await.unwrap();

    let candidate = select(&index).unwrap();
    assert_eq!(candidate.page_index, 0);
    assert_eq!(candidate.kind, CandidateKind::Synthesized);
}

#[tokio::test]
async fn test_pyramid_without_flags_uses_smallest_level() {
    let service = service_for(jpeg_pyramid(1024, 768, 4));

    let output = service.thumbnail(&remote(), 64).await.unwrap();

    assert_eq!(output.candidate.page_index, 3);
    assert_eq!(output.candidate.kind, CandidateKind::Synthesized);
    assert_eq!((output.width, output.height), (64, 48));
    assert_eq!(png_info(&output.png), (64, 48, image::ColorType::Rgb8));
}

#[tokio::test]
async fn test_jpeg_tiles_decode_close_to_source() {
    // Tile-aligned, so no tile carries padding
    let service = service_for(jpeg_pyramid(128, 128, 1));

    let output = service.thumbnail(&remote(), 128).await.unwrap();
    let decoded = image::load_from_memory(&output.png).unwrap().to_rgb8();
    let expected = rgb_pattern(128, 128);

    // Lossy, but a smooth gradient stays within a few levels
    let worst = decoded
        .as_raw()
        .iter()
        .zip(expected.as_raw())
        .map(|(&a, &b)| (a as i32 - b as i32).abs())
        .max()
        .unwrap();
    assert!(worst < 24, "max channel error {}", worst);
}

// =============================================================================
// Rejected Input
// =============================================================================

#[tokio::test]
async fn test_non_tiff_is_unsupported() {
    let mut data = b"GIF89a".to_vec();
    data.resize(256, 0);

    let err = service_for(data).metadata(&remote()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
}

#[tokio::test]
async fn test_cyclic_chain_is_corrupt() {
    let mut data = small_rgb_slide(32, 32);
    let first = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let entries = u16::from_le_bytes([data[first], data[first + 1]]) as usize;
    let next_at = first + 2 + entries * 12;
    data[next_at..next_at + 4].copy_from_slice(&(first as u32).to_le_bytes());

    let err = service_for(data).metadata(&remote()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptFormat);
}

#[tokio::test]
async fn test_truncated_file_is_corrupt() {
    let data = small_rgb_slide(32, 32);
    // Keep the header but cut the directory in half
    let truncated = data[..data.len() - 40].to_vec();

    let err = service_for(truncated).metadata(&remote()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptFormat);
}

#[tokio::test]
async fn test_extract_without_vendor_is_unknown() {
    let reader = TrackingMockReader::new(small_rgb_slide(32, 24), "mem://plain");
    let index = DirectoryParser::default().parse(&reader).await.unwrap();

    let metadata = extract(&index);
    assert_eq!(metadata.vendor, "unknown");
    assert_eq!((metadata.width, metadata.height), (32, 24));
    assert_eq!(metadata.mpp, None);
    assert_eq!(metadata.objective_power, None);
}

#[tokio::test]
async fn test_vendor_from_make_and_software() {
    let cases = [
        (TestPage::strips(64, 48).make("Hamamatsu"), "hamamatsu"),
        (TestPage::strips(64, 48).software("Philips DP v1.0"), "philips"),
        (TestPage::strips(64, 48).software("Aperio ImageScope v12"), "aperio"),
        (
            TestPage::strips(64, 48).describe("Leica SCN400;<objective>20</objective>"),
            "leica",
        ),
    ];

    for (page, vendor) in cases {
        let reader = TrackingMockReader::new(TiffBuilder::new().add_page(page).build(), "mem://v");
        let index = DirectoryParser::default().parse(&reader).await.unwrap();

        let metadata = extract(&index);
        assert_eq!(metadata.vendor, vendor);
        assert_eq!(metadata.objective_power, None);
    }
}
