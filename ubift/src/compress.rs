//! On-the-fly decompression of inode and data payloads.
//!
//! UBIFS stores each 4 KiB block with its own compression tag. Failure to
//! decompress is never fatal: the caller receives empty bytes and treats
//! the block as a hole.

use std::io::Read;

use ubift_media::node::CompressionType;

/// Decompresses `data` according to `compr_type`.
///
/// `size` is the expected decompressed length from the owning node; LZO and
/// zstd need it to size their output buffers. Unknown schemes and codec
/// failures are logged and yield empty bytes.
#[must_use]
pub fn decompress(data: &[u8], compr_type: u16, size: usize) -> Vec<u8> {
    let scheme = match CompressionType::try_from(compr_type) {
        Ok(scheme) => scheme,
        Err(other) => {
            tracing::warn!(compr_type = other, "payload compressed with unknown type");
            return Vec::new();
        }
    };
    let result = match scheme {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lzo => minilzo::decompress(data, size)
            .map_err(|err| format!("lzo: {err:?}")),
        CompressionType::Zlib => {
            let mut out = Vec::with_capacity(size);
            flate2::read::DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map(|_| out)
                .map_err(|err| format!("deflate: {err}"))
        }
        CompressionType::Zstd => zstd::bulk::decompress(data, size)
            .map_err(|err| format!("zstd: {err}")),
    };
    match result {
        Ok(out) => {
            if out.len() != size {
                tracing::warn!(
                    expected = size,
                    got = out.len(),
                    ?scheme,
                    "decompressed size differs from the declared size"
                );
            }
            out
        }
        Err(err) => {
            tracing::warn!(?scheme, err, "decompression failed, treating block as a hole");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn uncompressed_passes_through() {
        assert_eq!(decompress(b"hello", 0, 5), b"hello");
    }

    #[test]
    fn raw_deflate_round_trips() {
        let plain = b"hello world hello world hello world";
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(plain).unwrap();
        let packed = encoder.finish().unwrap();
        assert_eq!(decompress(&packed, 2, plain.len()), plain);
    }

    #[test]
    fn zstd_round_trips() {
        let plain = vec![7u8; 4096];
        let packed = zstd::bulk::compress(&plain, 3).unwrap();
        assert_eq!(decompress(&packed, 3, plain.len()), plain);
    }

    #[test]
    fn lzo_round_trips() {
        let plain = vec![42u8; 1024];
        let packed = minilzo::compress(&plain).unwrap();
        assert_eq!(decompress(&packed, 1, plain.len()), plain);
    }

    #[test]
    fn garbage_becomes_a_hole() {
        assert!(decompress(b"\x01\x02\x03", 2, 4096).is_empty());
        assert!(decompress(b"\x01\x02\x03", 3, 4096).is_empty());
        assert!(decompress(b"", 9, 10).is_empty());
    }
}
