//! Postgres sink integration tests
//!
//! These start a Postgres container and are ignored by default. Run with:
//! `cargo test -p imdb-ingest --test postgres_sink_tests -- --ignored`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use imdb_ingest::coercion::Value;
use imdb_ingest::normalize::RelationRow;
use imdb_ingest::{Dataset, PgSink, Pipeline, PipelineOptions, RelationalSink, SchemaRegistry};
use testcontainers::core::IntoContainerPort;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

async fn start_postgres() -> Result<(ContainerAsync<Postgres>, String)> {
    let container = Postgres::default().with_tag("16-alpine").start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432.tcp()).await?;
    let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
    Ok((container, url))
}

fn title(tconst: &str, title_type: &str, start_year: Option<i64>) -> RelationRow {
    RelationRow::new(vec![
        Value::from(tconst),
        Value::from(title_type),
        Value::from("Primary"),
        Value::from("Original"),
        Value::Bool(false),
        start_year.map(Value::Int).unwrap_or(Value::Null),
        Value::Null,
        Value::Int(90),
    ])
}

#[tokio::test]
#[ignore]
async fn test_create_append_and_count() -> Result<()> {
    let (_container, url) = start_postgres().await?;
    let mut sink = PgSink::connect(&url).await?;
    let registry = SchemaRegistry::imdb()?;

    registry.create_all(&mut sink, true).await?;

    let titles = registry.table("title_basics")?;
    let appended = sink
        .append(
            titles,
            &[title("tt1", "movie", Some(1994)), title("tt2", "short", None)],
        )
        .await?;
    assert_eq!(appended, 2);
    assert_eq!(sink.row_count(titles).await?, 2);

    let keys = sink.fetch_keys(titles, "tconst").await?;
    assert_eq!(keys.len(), 2);
    assert!(keys.contains("tt1"));

    registry.drop_all(&mut sink, true).await?;
    sink.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_foreign_keys_enforced_unless_disabled() -> Result<()> {
    let (_container, url) = start_postgres().await?;
    let mut sink = PgSink::connect(&url).await?;
    let registry = SchemaRegistry::imdb()?;
    registry.create_all(&mut sink, true).await?;

    let ratings = registry.table("title_ratings")?;
    let orphan = RelationRow::new(vec![Value::from("tt404"), Value::Float(7.1), Value::Int(12)]);

    assert!(sink.append(ratings, std::slice::from_ref(&orphan)).await.is_err());
    assert_eq!(sink.row_count(ratings).await?, 0);

    sink.set_foreign_key_checks(false).await?;
    assert_eq!(sink.append(ratings, &[orphan]).await?, 1);
    sink.set_foreign_key_checks(true).await?;

    sink.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_large_append_is_split_into_statements() -> Result<()> {
    let (_container, url) = start_postgres().await?;
    let mut sink = PgSink::connect(&url).await?;
    let registry = SchemaRegistry::imdb()?;
    registry.create_all(&mut sink, true).await?;

    // 8 columns per row: more than one statement's worth of bind parameters
    let titles = registry.table("title_basics")?;
    let rows: Vec<RelationRow> = (0..10_000)
        .map(|i| title(&format!("tt{:07}", i), "movie", Some(2000)))
        .collect();

    assert_eq!(sink.append(titles, &rows).await?, 10_000);
    assert_eq!(sink.row_count(titles).await?, 10_000);

    sink.close().await?;
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_pipeline_into_postgres() -> Result<()> {
    let (_container, url) = start_postgres().await?;
    let dir = tempfile::tempdir()?;

    std::fs::write(
        Dataset::NameBasics.path_in(dir.path()),
        "nconst\tprimaryName\tbirthYear\tdeathYear\tprimaryProfession\tknownForTitles\n\
         nm1\tFred Astaire\t1899\t1987\tactor,soundtrack\ttt1\n",
    )?;
    std::fs::write(
        Dataset::TitleBasics.path_in(dir.path()),
        "tconst\ttitleType\tprimaryTitle\toriginalTitle\tisAdult\tstartYear\tendYear\truntimeMinutes\tgenres\n\
         tt1\tmovie\tTop Hat\tTop Hat\t0\t1935\t\\N\t101\tComedy,Musical\n",
    )?;
    std::fs::write(
        Dataset::TitleRatings.path_in(dir.path()),
        "tconst\taverageRating\tnumVotes\ntt1\t7.7\t17000\ntt9\t5.0\t3\n",
    )?;

    let options = PipelineOptions {
        data_dir: dir.path().to_path_buf(),
        show_progress: false,
        ..PipelineOptions::default()
    };
    let pipeline = Pipeline::imdb(options)?.only(&[
        "name_basics".to_string(),
        "title_basics".to_string(),
        "name_primary_professions".to_string(),
        "name_known_for_titles".to_string(),
        "title_genres".to_string(),
        "title_ratings".to_string(),
    ])?;

    let mut sink = PgSink::connect(&url).await?;
    let first = pipeline.run(&mut sink).await?;
    let second = pipeline.run(&mut sink).await?;
    sink.close().await?;

    assert!(first.succeeded(), "{:?}", first.failed());
    assert_eq!(first.row_counts.get("title_genres"), Some(&2));
    assert_eq!(first.row_counts.get("name_primary_professions"), Some(&2));
    assert_eq!(first.row_counts.get("title_ratings"), Some(&1));
    assert_eq!(first.row_counts, second.row_counts);
    Ok(())
}
