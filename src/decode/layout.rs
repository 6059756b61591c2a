//! Page geometry: pixel format, strip/tile grid and segment placement.

use crate::error::DecodeError;
use crate::format::tiff::{ByteOrder, Compression, Ifd, Photometric, PlanarConfig, TiffTag};

/// Smallest tile edge limit; tiles may overhang small images up to this.
const MIN_TILE_EDGE_LIMIT: u32 = 1024;

/// How a page's pixels are cut into independently compressed segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organization {
    Tiles { width: u32, height: u32 },
    Strips { rows_per_strip: u32 },
}

/// Everything needed to turn a page's segments into one raster.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub page: usize,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub compression: Compression,
    pub photometric: Photometric,
    pub planar: PlanarConfig,
    pub predictor: u16,
    pub subsampling: (u16, u16),
    pub byte_order: ByteOrder,
    pub organization: Organization,
}

/// Where one segment lands in the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Sample plane for planar pages, 0 otherwise
    pub plane: usize,
    pub x: u32,
    pub y: u32,
    /// Encoded segment size; tiles are always full size
    pub encoded_width: u32,
    pub encoded_height: u32,
    /// Part of the segment inside the image
    pub visible_width: u32,
    pub visible_height: u32,
}

impl PageLayout {
    /// Read and validate the pixel format and segment grid of a page.
    pub fn from_ifd(ifd: &Ifd, byte_order: ByteOrder) -> Result<Self, DecodeError> {
        let page = ifd.page_index;
        let unsupported = |message: String| DecodeError::UnsupportedLayout { page, message };

        let (width, height) = ifd
            .dimensions()
            .ok_or_else(|| unsupported("missing or zero image dimensions".to_string()))?;

        let code = ifd.compression_code();
        let compression =
            Compression::from_u16(code).ok_or(DecodeError::UnsupportedCompression { code, page })?;

        let samples_per_pixel = ifd
            .u64_value(TiffTag::SamplesPerPixel)
            .unwrap_or(1)
            .min(u16::MAX as u64) as u16;
        if !(1..=4).contains(&samples_per_pixel) {
            return Err(unsupported(format!("{} samples per pixel", samples_per_pixel)));
        }

        let bits = ifd
            .value(TiffTag::BitsPerSample)
            .and_then(|v| v.as_u64_slice().map(<[u64]>::to_vec))
            .unwrap_or_else(|| vec![1]);
        let bits_per_sample = bits.first().copied().unwrap_or(1);
        if bits.iter().any(|&b| b != bits_per_sample) {
            return Err(unsupported(format!("mixed bits per sample {:?}", bits)));
        }
        if bits_per_sample != 8 && bits_per_sample != 16 {
            return Err(unsupported(format!("{}-bit samples", bits_per_sample)));
        }
        let bits_per_sample = bits_per_sample as u16;

        if let Some(formats) = ifd.value(TiffTag::SampleFormat).and_then(|v| v.as_u64_slice()) {
            if formats.iter().any(|&f| f != 1) {
                return Err(unsupported(format!("sample format {:?}", formats)));
            }
        }

        let photometric = match ifd.u64_value(TiffTag::PhotometricInterpretation) {
            Some(v) => Photometric::from_u16(v.min(u16::MAX as u64) as u16),
            None if samples_per_pixel >= 3 => Photometric::Rgb,
            None => Photometric::MinIsBlack,
        };
        match photometric {
            Photometric::MinIsWhite | Photometric::MinIsBlack | Photometric::Rgb => {}
            Photometric::YCbCr if samples_per_pixel == 3 => {}
            other => return Err(unsupported(format!("photometric {:?}", other))),
        }

        let planar_code = ifd.u64_value(TiffTag::PlanarConfiguration).unwrap_or(1);
        let planar = u16::try_from(planar_code)
            .ok()
            .and_then(PlanarConfig::from_u16)
            .ok_or_else(|| unsupported(format!("planar configuration {}", planar_code)))?;

        let predictor = ifd.u64_value(TiffTag::Predictor).unwrap_or(1) as u16;
        if predictor != 1 && predictor != 2 {
            return Err(unsupported(format!("predictor {}", predictor)));
        }

        let subsampling = match ifd.value(TiffTag::YCbCrSubSampling).and_then(|v| v.as_u64_slice()) {
            Some([h, v, ..]) => (*h as u16, *v as u16),
            _ => (2, 2),
        };

        let organization = if ifd.is_tiled() {
            let tile_width = ifd.u32_value(TiffTag::TileWidth).unwrap_or(0);
            let tile_height = ifd.u32_value(TiffTag::TileLength).unwrap_or(0);
            // A tile may overhang the image, but not past the next power of two
            let limit = |edge: u32| edge.max(MIN_TILE_EDGE_LIMIT).checked_next_power_of_two();
            let oversized = |tile: u32, edge: u32| limit(edge).map_or(false, |max| tile > max);
            if tile_width == 0
                || tile_height == 0
                || oversized(tile_width, width)
                || oversized(tile_height, height)
            {
                return Err(DecodeError::SegmentTable {
                    page,
                    message: format!("tile size {}x{} for a {}x{} image", tile_width, tile_height, width, height),
                });
            }
            Organization::Tiles {
                width: tile_width,
                height: tile_height,
            }
        } else {
            // RowsPerStrip of 2^32-1 (or anything past the height) means one strip
            let rows = ifd.u32_value(TiffTag::RowsPerStrip).unwrap_or(height);
            Organization::Strips {
                rows_per_strip: rows.clamp(1, height),
            }
        };

        let layout = Self {
            page,
            width,
            height,
            samples_per_pixel,
            bits_per_sample,
            compression,
            photometric,
            planar,
            predictor,
            subsampling,
            byte_order,
            organization,
        };
        layout.check_codec_combination()?;
        Ok(layout)
    }

    fn check_codec_combination(&self) -> Result<(), DecodeError> {
        let unsupported = |message: &str| DecodeError::UnsupportedLayout {
            page: self.page,
            message: message.to_string(),
        };
        if self.is_image_codec() {
            if self.bits_per_sample != 8 {
                return Err(unsupported("image codecs need 8-bit samples"));
            }
            if self.planes() > 1 {
                return Err(unsupported("planar image-codec segments"));
            }
        }
        if self.is_raw_ycbcr() && self.bits_per_sample != 8 {
            return Err(unsupported("YCbCr samples must be 8-bit"));
        }
        if self.is_subsampled_ycbcr() {
            if self.bits_per_sample != 8 || self.planes() > 1 || self.predictor != 1 {
                return Err(unsupported("subsampled YCbCr must be 8-bit chunky without predictor"));
            }
            let valid = |f: u16| matches!(f, 1 | 2 | 4);
            if !valid(self.subsampling.0) || !valid(self.subsampling.1) {
                return Err(unsupported("YCbCr subsampling factors must be 1, 2 or 4"));
            }
        }
        Ok(())
    }

    /// JPEG and JPEG 2000 segments decode to rasters, not byte streams.
    pub fn is_image_codec(&self) -> bool {
        matches!(
            self.compression,
            Compression::Jpeg
                | Compression::Jpeg2000
                | Compression::Jpeg2000YCbCr
                | Compression::Jpeg2000Rgb
        )
    }

    /// Raw YCbCr samples needing conversion by us rather than by a codec.
    pub fn is_raw_ycbcr(&self) -> bool {
        self.photometric == Photometric::YCbCr && !self.is_image_codec()
    }

    pub fn is_subsampled_ycbcr(&self) -> bool {
        self.is_raw_ycbcr() && self.subsampling != (1, 1)
    }

    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Samples per pixel of the decoded image.
    pub fn output_samples(&self) -> usize {
        match self.compression {
            Compression::Jpeg2000YCbCr | Compression::Jpeg2000Rgb => 3,
            Compression::Jpeg | Compression::Jpeg2000 if self.samples_per_pixel >= 3 => 3,
            Compression::Jpeg | Compression::Jpeg2000 => 1,
            _ => self.samples_per_pixel as usize,
        }
    }

    /// Size of the assembled image in bytes, `None` on overflow.
    pub fn decoded_bytes(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.output_samples())?
            .checked_mul(self.bytes_per_sample())
    }

    /// Segment width and height before clipping.
    pub fn segment_size(&self) -> (u32, u32) {
        match self.organization {
            Organization::Tiles { width, height } => (width, height),
            Organization::Strips { rows_per_strip } => (self.width, rows_per_strip),
        }
    }

    pub fn segments_across(&self) -> u32 {
        self.width.div_ceil(self.segment_size().0)
    }

    pub fn segments_down(&self) -> u32 {
        self.height.div_ceil(self.segment_size().1)
    }

    pub fn planes(&self) -> usize {
        match self.planar {
            PlanarConfig::Planar => self.samples_per_pixel as usize,
            PlanarConfig::Chunky => 1,
        }
    }

    pub fn segments_per_plane(&self) -> usize {
        self.segments_across() as usize * self.segments_down() as usize
    }

    /// Number of entries the offset and byte-count tables must hold.
    pub fn segment_count(&self) -> usize {
        self.segments_per_plane() * self.planes()
    }

    /// Position and extent of segment `index`.
    pub fn placement(&self, index: usize) -> Placement {
        let per_plane = self.segments_per_plane().max(1);
        let plane = index / per_plane;
        let within = index % per_plane;
        let across = self.segments_across().max(1) as usize;
        let (seg_w, seg_h) = self.segment_size();
        let x = (within % across) as u32 * seg_w;
        let y = (within / across) as u32 * seg_h;
        let visible_width = seg_w.min(self.width - x);
        let visible_height = seg_h.min(self.height - y);

        let encoded_height = match self.organization {
            Organization::Tiles { .. } => seg_h,
            Organization::Strips { .. } => visible_height,
        };

        Placement {
            plane,
            x,
            y,
            encoded_width: seg_w,
            encoded_height,
            visible_width,
            visible_height,
        }
    }

    /// Samples per pixel stored in one segment.
    pub fn segment_samples(&self) -> usize {
        match self.planar {
            PlanarConfig::Planar => 1,
            PlanarConfig::Chunky => self.samples_per_pixel as usize,
        }
    }

    /// Uncompressed size of a byte-oriented segment, `None` on overflow.
    pub fn raw_segment_bytes(&self, placement: &Placement) -> Option<usize> {
        let w = placement.encoded_width as usize;
        let h = placement.encoded_height as usize;
        if self.is_subsampled_ycbcr() {
            let (sh, sv) = (self.subsampling.0 as usize, self.subsampling.1 as usize);
            w.div_ceil(sh)
                .checked_mul(h.div_ceil(sv))?
                .checked_mul(sh * sv + 2)
        } else {
            w.checked_mul(h)?
                .checked_mul(self.segment_samples())?
                .checked_mul(self.bytes_per_sample())
        }
    }

    /// Uncompressed size of one full segment, `None` on overflow.
    pub fn full_segment_bytes(&self) -> Option<usize> {
        let (encoded_width, encoded_height) = self.segment_size();
        let full = Placement {
            plane: 0,
            x: 0,
            y: 0,
            encoded_width,
            encoded_height,
            visible_width: encoded_width,
            visible_height: encoded_height,
        };
        self.raw_segment_bytes(&full)
    }
}

/// The assembled output buffer.
#[derive(Debug)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
    pub samples: usize,
    pub bytes_per_sample: usize,
    pub data: Vec<u8>,
}

impl Canvas {
    pub fn new(width: usize, height: usize, samples: usize, bytes_per_sample: usize) -> Self {
        Self {
            width,
            height,
            samples,
            bytes_per_sample,
            data: vec![0; width * height * samples * bytes_per_sample],
        }
    }

    /// Copy a decoded segment into place, clipped to the visible area.
    ///
    /// `source` holds `source_width x source_height` pixels of
    /// `source_samples` samples each; with `plane = Some(p)` the single
    /// source sample is written to sample `p` of each output pixel.
    pub fn blit(
        &mut self,
        source: &[u8],
        source_width: usize,
        source_height: usize,
        source_samples: usize,
        placement: &Placement,
        plane: Option<usize>,
    ) {
        let bps = self.bytes_per_sample;
        let x0 = placement.x as usize;
        let y0 = placement.y as usize;
        let w = (placement.visible_width as usize).min(source_width);
        let h = (placement.visible_height as usize).min(source_height);
        let src_pixel = source_samples * bps;
        let dst_pixel = self.samples * bps;

        for row in 0..h {
            let src_row = &source[row * source_width * src_pixel..][..w * src_pixel];
            let dst_start = ((y0 + row) * self.width + x0) * dst_pixel;
            let dst_row = &mut self.data[dst_start..dst_start + w * dst_pixel];
            match plane {
                None if source_samples == self.samples => dst_row.copy_from_slice(src_row),
                None => {
                    // Gray segment into an RGB canvas or vice versa
                    for (dst, src) in dst_row
                        .chunks_exact_mut(dst_pixel)
                        .zip(src_row.chunks_exact(src_pixel))
                    {
                        for s in 0..self.samples {
                            let from = s.min(source_samples - 1) * bps;
                            dst[s * bps..(s + 1) * bps].copy_from_slice(&src[from..from + bps]);
                        }
                    }
                }
                Some(p) => {
                    for (dst, src) in dst_row
                        .chunks_exact_mut(dst_pixel)
                        .zip(src_row.chunks_exact(src_pixel))
                    {
                        dst[p * bps..(p + 1) * bps].copy_from_slice(&src[..bps]);
                    }
                }
            }
        }
    }
}
