//! Raw flash images and geometry inference.
//!
//! An [`Image`] owns the dump bytes and knows the three sizes everything
//! above it depends on: erase-block size, page size, and (if the dump was
//! taken with spare area) the OOB size. Missing sizes are inferred from UBI
//! erase-counter headers before any other layer touches the data.

use ubift_media::ubi::{EcHeader, UBI_EC_HDR_MAGIC_BYTES};

use crate::{Error, Result};

/// Upper bound on pages per erase block during block-size inference.
const MAX_PAGES_PER_BLOCK: u32 = 1023;

/// Geometry passed to [`Image::open`]; unset sizes are inferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageGeometry {
    /// Erase-block size in bytes, without OOB.
    pub block_size: Option<u32>,
    /// Page size in bytes, without OOB.
    pub page_size: Option<u32>,
    /// OOB bytes trailing each page, zero when the dump has none.
    pub oob_size: u32,
}

/// A raw NAND dump with resolved geometry.
///
/// The byte buffer is owned here and borrowed by every higher layer;
/// nothing above copies image bytes until recovery writes output files.
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    block_size: u32,
    page_size: u32,
    oob_size: u32,
}

impl Image {
    /// Opens an image, inferring missing geometry and stripping OOB.
    ///
    /// Fails with [`Error::GeometryUnknown`] when a missing size cannot be
    /// inferred because no erase-counter header exists in the dump.
    pub fn open(data: Vec<u8>, geometry: ImageGeometry) -> Result<Self> {
        let oob_size = geometry.oob_size;
        let page_size = match geometry.page_size {
            Some(size) if size > 0 => size,
            _ => infer_page_size(&data)?,
        };
        let block_size = match geometry.block_size {
            Some(size) if size > 0 => size,
            _ => infer_block_size(&data, page_size, oob_size)?,
        };
        let data = if oob_size > 0 {
            tracing::info!(oob_size, "stripping OOB from every page");
            strip_oob(&data, page_size, oob_size)
        } else {
            data
        };

        if block_size == 0 || data.len() % block_size as usize != 0 {
            tracing::error!(
                data_len = data.len(),
                block_size,
                "image length is not a whole number of erase blocks"
            );
        }
        if page_size == 0 || block_size % page_size != 0 {
            tracing::error!(block_size, page_size, "erase block is not a whole number of pages");
        }
        tracing::info!(
            block_size,
            page_size,
            oob_size,
            data_len = data.len(),
            "initialized image"
        );

        Ok(Self { data, block_size, page_size, oob_size })
    }

    /// The image bytes, OOB already stripped.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Erase-block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Page size in bytes.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// OOB bytes per page in the original dump.
    #[must_use]
    pub fn oob_size(&self) -> u32 {
        self.oob_size
    }

    /// Number of whole physical erase blocks in the image.
    #[must_use]
    pub fn peb_count(&self) -> u32 {
        (self.data.len() / self.block_size as usize) as u32
    }

    /// The bytes of one physical erase block.
    #[must_use]
    pub fn peb(&self, index: u32) -> Option<&[u8]> {
        let start = index as usize * self.block_size as usize;
        self.data.get(start..start + self.block_size as usize)
    }
}

/// Removes the OOB area from a dump.
///
/// The input is treated as a sequence of `(page_size + oob_size)`-byte
/// units: the leading `page_size` bytes of each unit are kept, the rest are
/// dropped. A trailing partial unit contributes its data bytes only.
#[must_use]
pub fn strip_oob(data: &[u8], page_size: u32, oob_size: u32) -> Vec<u8> {
    let unit = page_size as usize + oob_size as usize;
    let mut out = Vec::with_capacity(data.len() / unit * page_size as usize + page_size as usize);
    for chunk in data.chunks(unit) {
        out.extend_from_slice(&chunk[..chunk.len().min(page_size as usize)]);
    }
    out
}

/// Finds the next occurrence of `needle` in `haystack` at or after `from`.
pub(crate) fn find_signature(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

/// Infers the page size from the first erase-counter header.
///
/// The `vid_hdr_offset` field is page-aligned and, on every layout UBI
/// produces, equals one page.
fn infer_page_size(data: &[u8]) -> Result<u32> {
    let at = find_signature(data, &UBI_EC_HDR_MAGIC_BYTES, 0)
        .ok_or(Error::GeometryUnknown("page size not given and no erase-counter header found"))?;
    let ec = EcHeader::parse(data, at)?;
    if ec.vid_hdr_offset == 0 {
        return Err(Error::GeometryUnknown("erase-counter header carries no vid_hdr_offset"));
    }
    tracing::info!(page_size = ec.vid_hdr_offset, "guessed page size");
    Ok(ec.vid_hdr_offset)
}

/// Infers the block size as the distance between two erase-counter magics.
///
/// Walks multiples of the page size (the unit grows by `oob_size` while the
/// dump is still interleaved) until the magic reappears.
fn infer_block_size(data: &[u8], page_size: u32, oob_size: u32) -> Result<u32> {
    let first = find_signature(data, &UBI_EC_HDR_MAGIC_BYTES, 0)
        .ok_or(Error::GeometryUnknown("block size not given and no erase-counter header found"))?;
    let unit = (page_size + oob_size) as usize;
    for pages in 1..=MAX_PAGES_PER_BLOCK as usize {
        let at = first + pages * unit;
        if data.get(at..at + 4) == Some(&UBI_EC_HDR_MAGIC_BYTES[..]) {
            let block_size = page_size * pages as u32;
            tracing::info!(block_size, "guessed block size");
            return Ok(block_size);
        }
    }
    Err(Error::GeometryUnknown("no second erase-counter header within 1023 pages"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sealed erase-counter header with the given vid/data offsets.
    fn ec_bytes(vid_hdr_offset: u32, data_offset: u32) -> [u8; 64] {
        let mut ec = EcHeader {
            version: 1,
            ec: 0,
            vid_hdr_offset,
            data_offset,
            image_seq: 1,
            hdr_crc: 0,
        };
        ec.seal();
        ec.to_bytes()
    }

    #[test]
    fn geometry_is_inferred_from_ec_headers() {
        // 32 PEBs of 128 KiB; EC headers on the first two blocks.
        let mut data = vec![0u8; 32 * 131_072];
        data[..64].copy_from_slice(&ec_bytes(2048, 4096));
        data[131_072..131_072 + 64].copy_from_slice(&ec_bytes(2048, 4096));

        let image = Image::open(data, ImageGeometry::default()).unwrap();
        assert_eq!(image.page_size(), 2048);
        assert_eq!(image.block_size(), 131_072);
        assert_eq!(image.peb_count(), 32);
    }

    #[test]
    fn open_fails_without_headers_or_sizes() {
        let err = Image::open(vec![0u8; 4096], ImageGeometry::default()).unwrap_err();
        assert!(matches!(err, Error::GeometryUnknown(_)));
    }

    #[test]
    fn explicit_geometry_skips_inference() {
        let image = Image::open(
            vec![0u8; 8192],
            ImageGeometry { block_size: Some(4096), page_size: Some(512), oob_size: 0 },
        )
        .unwrap();
        assert_eq!(image.peb_count(), 2);
        assert_eq!(image.peb(1).unwrap().len(), 4096);
        assert!(image.peb(2).is_none());
    }

    #[test]
    fn strip_oob_drops_page_trailers() {
        // 2048 units of 2048 data bytes ('A') followed by 64 OOB bytes ('B').
        let mut data = Vec::new();
        for _ in 0..2048 {
            data.extend(std::iter::repeat_n(b'A', 2048));
            data.extend(std::iter::repeat_n(b'B', 64));
        }
        let stripped = strip_oob(&data, 2048, 64);
        assert_eq!(stripped.len(), 2048 * 2048);
        assert!(stripped.iter().all(|&b| b == b'A'));
    }

    #[test]
    fn strip_oob_inverts_interleave() {
        let original: Vec<u8> = (0..=255u8).cycle().take(4 * 128).collect();
        let mut interleaved = Vec::new();
        for chunk in original.chunks(128) {
            interleaved.extend_from_slice(chunk);
            interleaved.extend(std::iter::repeat_n(0u8, 16));
        }
        assert_eq!(strip_oob(&interleaved, 128, 16), original);
    }

    #[test]
    fn oob_geometry_inference_uses_the_interleaved_stride() {
        // Two blocks of 4 pages each; page 512 + 16 OOB.
        let unit = 512 + 16;
        let mut data = vec![0u8; 2 * 4 * unit];
        data[..64].copy_from_slice(&ec_bytes(512, 1024));
        let second_block = 4 * unit;
        data[second_block..second_block + 64].copy_from_slice(&ec_bytes(512, 1024));

        let image = Image::open(
            data,
            ImageGeometry { block_size: None, page_size: None, oob_size: 16 },
        )
        .unwrap();
        assert_eq!(image.page_size(), 512);
        assert_eq!(image.block_size(), 2048);
        // OOB already stripped: two whole logical blocks remain.
        assert_eq!(image.peb_count(), 2);
    }

    #[test]
    fn find_signature_scans_forward() {
        let hay = b"xxUBI#yyUBI#";
        assert_eq!(find_signature(hay, b"UBI#", 0), Some(2));
        assert_eq!(find_signature(hay, b"UBI#", 3), Some(8));
        assert_eq!(find_signature(hay, b"UBI#", 9), None);
    }
}
