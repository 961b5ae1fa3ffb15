//! Integration tests for header decoding and band discovery on disk

mod common;

use bandmap::{BandCatalog, BundleHeader, CatalogError, HeaderError};
use common::write_bundle;
use std::fs;

#[test]
fn test_discover_sorts_and_sizes_bands() {
    let bundle = write_bundle(4096, 45056, &[("a", 100), ("0", 4096), ("2", 2048)]);
    let header = BundleHeader::load(bundle.path()).unwrap();
    let catalog = BandCatalog::discover(bundle.path(), &header).unwrap();

    let found: Vec<(u64, u64)> = catalog.bands().iter().map(|b| (b.id, b.size)).collect();
    assert_eq!(found, vec![(0, 4096), (2, 2048), (10, 100)]);
    assert_eq!(catalog.offset_of(2), 10 * 4096);
}

#[test]
fn test_discover_descends_into_shards() {
    let bundle = write_bundle(4096, 16384, &[("00/1", 4096), ("01/3", 4096), ("0", 4096)]);
    let header = BundleHeader::load(bundle.path()).unwrap();
    let catalog = BandCatalog::discover(bundle.path(), &header).unwrap();

    let ids: Vec<u64> = catalog.bands().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1, 3]);
    assert!(catalog.bands()[1].path.ends_with("00/1"));
}

#[test]
fn test_discover_empty_band_directory() {
    let bundle = write_bundle(4096, 8192, &[]);
    let header = BundleHeader::load(bundle.path()).unwrap();
    let catalog = BandCatalog::discover(bundle.path(), &header).unwrap();
    assert!(catalog.is_empty());
}

#[test]
fn test_duplicate_ordinal_across_shards() {
    let bundle = write_bundle(4096, 8192, &[("x/1", 4096), ("y/01", 4096)]);
    let header = BundleHeader::load(bundle.path()).unwrap();
    let err = BandCatalog::discover(bundle.path(), &header).unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateBand { id: 1, .. }));
}

#[test]
fn test_unparsable_band_name_is_fatal() {
    let bundle = write_bundle(4096, 8192, &[("0", 4096), (".DS_Store", 6148)]);
    let header = BundleHeader::load(bundle.path()).unwrap();
    let err = BandCatalog::discover(bundle.path(), &header).unwrap_err();
    assert!(matches!(err, CatalogError::InvalidBandName(_)));
}

#[test]
fn test_missing_band_directory_is_an_error() {
    let bundle = write_bundle(4096, 8192, &[]);
    fs::remove_dir(bundle.path().join("bands")).unwrap();
    let header = BundleHeader::load(bundle.path()).unwrap();
    let err = BandCatalog::discover(bundle.path(), &header).unwrap_err();
    assert!(matches!(err, CatalogError::Walk(_)));
}

#[test]
fn test_missing_header_is_an_error() {
    let bundle = write_bundle(4096, 8192, &[]);
    fs::remove_file(bundle.path().join("Info.plist")).unwrap();
    let err = BundleHeader::load(bundle.path()).unwrap_err();
    assert!(matches!(err, HeaderError::Io { .. }));
}
