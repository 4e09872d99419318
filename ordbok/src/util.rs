//! Small helpers shared by the cache, fetcher and front ends

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const SI_SHORT: [&str; 8] = ["K", "M", "G", "T", "P", "E", "Z", "Y"];
const SI_LONG: [&str; 8] = ["Kilo", "Mega", "Giga", "Tera", "Peta", "Exa", "Zetta", "Yotta"];
const BINARY_SHORT: [&str; 8] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi", "Yi"];
const BINARY_LONG: [&str; 8] = ["Kibi", "Mebi", "Gibi", "Tebi", "Pebi", "Exbi", "Zebi", "Yobi"];

pub fn gzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn gunzip(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Whether `bytes` starts with the gzip member header
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// How [`fmt_filesize`] renders a byte count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesizeFormat {
    /// "Megabytes" instead of "MB"
    pub long_units: bool,
    /// Powers of 1024 ("MiB") instead of 1000 ("MB")
    pub binary: bool,
    pub decimals: usize,
}

impl Default for FilesizeFormat {
    fn default() -> Self {
        Self {
            long_units: false,
            binary: false,
            decimals: 2,
        }
    }
}

pub fn fmt_filesize(bytes: u64, format: FilesizeFormat) -> String {
    let multiplier: u64 = if format.binary { 1024 } else { 1000 };
    let suffix = if format.long_units { "bytes" } else { "B" };
    let units = match (format.binary, format.long_units) {
        (false, false) => &SI_SHORT,
        (false, true) => &SI_LONG,
        (true, false) => &BINARY_SHORT,
        (true, true) => &BINARY_LONG,
    };

    if bytes == 1 {
        return format!("1 {}", if format.long_units { "byte" } else { "B" });
    }
    if bytes < multiplier {
        return format!("{} {}", bytes, suffix);
    }

    let mut scaled = bytes as f64 / multiplier as f64;
    for unit in units {
        if scaled < multiplier as f64 {
            return format!("{:.*} {}{}", format.decimals, scaled, unit, suffix);
        }
        scaled /= multiplier as f64;
    }

    format!("{} {}", bytes, suffix)
}

pub fn human_filesize(bytes: u64) -> String {
    fmt_filesize(bytes, FilesizeFormat::default())
}

/// Stable-reorder `items` so everything matching the first predicate comes
/// first, then the second, and so on. Items matching no predicate go last.
pub fn order_in_groups<T>(items: &mut [T], groups: &[&dyn Fn(&T) -> bool]) {
    if groups.is_empty() {
        return;
    }
    items.sort_by_cached_key(|item| {
        groups
            .iter()
            .position(|matches| matches(item))
            .unwrap_or(groups.len())
    });
}

/// Whole-number percentage of `done` out of `total`, clamped to 0..=100
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (done as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip_and_magic() {
        let data = b"[null,{}]".repeat(100);
        let packed = gzip(&data).unwrap();
        assert!(is_gzip(&packed));
        assert!(!is_gzip(&data));
        assert_eq!(gunzip(&packed).unwrap(), data);
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        assert!(gunzip(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_filesize_corner_cases() {
        assert_eq!(human_filesize(1), "1 B");
        assert_eq!(human_filesize(0), "0 B");
        assert_eq!(human_filesize(999), "999 B");
        let long = FilesizeFormat { long_units: true, ..Default::default() };
        assert_eq!(fmt_filesize(1, long), "1 byte");
        assert_eq!(fmt_filesize(12, long), "12 bytes");
    }

    #[test]
    fn test_filesize_prefixes() {
        assert_eq!(human_filesize(1500), "1.50 KB");
        assert_eq!(human_filesize(2_345_678), "2.35 MB");
        let binary = FilesizeFormat { binary: true, decimals: 1, ..Default::default() };
        assert_eq!(fmt_filesize(2048, binary), "2.0 KiB");
        let long = FilesizeFormat { long_units: true, decimals: 0, ..Default::default() };
        assert_eq!(fmt_filesize(3_000_000, long), "3 Megabytes");
    }

    #[test]
    fn test_order_in_groups_is_stable() {
        let mut words = vec!["sme-nob", "nob-sme", "fin-nob", "nob-fin", "sma-nob"];
        let from_nob = |w: &&str| w.starts_with("nob");
        let into_nob = |w: &&str| w.ends_with("nob");
        order_in_groups(&mut words, &[&from_nob, &into_nob]);
        assert_eq!(words, vec!["nob-sme", "nob-fin", "sme-nob", "fin-nob", "sma-nob"]);

        let mut untouched = vec![3, 1, 2];
        order_in_groups(&mut untouched, &[]);
        assert_eq!(untouched, vec![3, 1, 2]);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(50, 200), 25);
        assert_eq!(progress_percent(300, 200), 100);
    }
}
