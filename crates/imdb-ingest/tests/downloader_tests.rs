//! Downloader tests against a mock dump server

#![allow(clippy::unwrap_used, clippy::expect_used)]

use flate2::write::GzEncoder;
use flate2::Compression;
use imdb_ingest::{Dataset, DumpDownloader, IngestError};
use std::io::Write;
use std::time::Duration;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const RATINGS: &str = "tconst\taverageRating\tnumVotes\ntt0000001\t5.7\t2071\n";

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[tokio::test]
async fn test_ensure_downloads_and_decompresses() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/title.ratings.tsv.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(RATINGS.as_bytes())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = DumpDownloader::new(mock_server.uri(), dir.path()).unwrap();

    let path = downloader.ensure(Dataset::TitleRatings).await.unwrap();

    assert_eq!(path, dir.path().join("title.ratings.tsv"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), RATINGS);
    assert!(!dir.path().join("title.ratings.tsv.gz").exists());
}

#[tokio::test]
async fn test_second_ensure_does_not_download_again() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/title.ratings.tsv.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(gzip(RATINGS.as_bytes())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = DumpDownloader::new(mock_server.uri(), dir.path()).unwrap();

    downloader.ensure(Dataset::TitleRatings).await.unwrap();
    downloader.ensure(Dataset::TitleRatings).await.unwrap();
}

#[tokio::test]
async fn test_missing_archive_fails_after_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/title.crew.tsv.gz"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = DumpDownloader::new(mock_server.uri(), dir.path())
        .unwrap()
        .with_retries(2, Duration::ZERO);

    let result = downloader.ensure(Dataset::TitleCrew).await;

    assert!(matches!(result, Err(IngestError::Http(_))));
    assert!(!dir.path().join("title.crew.tsv").exists());
}

#[tokio::test]
async fn test_ensure_all_fetches_each_file() {
    let mock_server = MockServer::start().await;

    for dataset in [Dataset::TitleRatings, Dataset::TitleCrew] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", dataset.archive_name())))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(gzip(dataset.stem().as_bytes())),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let downloader = DumpDownloader::new(mock_server.uri(), dir.path()).unwrap();

    let paths = downloader
        .ensure_all(&[Dataset::TitleRatings, Dataset::TitleCrew])
        .await
        .unwrap();

    assert_eq!(paths.len(), 2);
    assert_eq!(
        std::fs::read_to_string(&paths[1]).unwrap(),
        Dataset::TitleCrew.stem()
    );
}

#[tokio::test]
async fn test_failed_download_removes_partial_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/title.akas.tsv.gz"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let partial = dir.path().join("title.akas.tsv.gz.part");
    std::fs::write(&partial, b"truncated").unwrap();

    let downloader = DumpDownloader::new(mock_server.uri(), dir.path())
        .unwrap()
        .with_retries(1, Duration::ZERO);

    assert!(downloader.ensure(Dataset::TitleAkas).await.is_err());
    assert!(!partial.exists());
    assert!(!dir.path().join("title.akas.tsv.gz").exists());
}
