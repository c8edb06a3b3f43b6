use wikigraph::config::{Config, SinkBackend};
use wikigraph::db::Db;
use wikigraph::error::WikigraphError;
use wikigraph::{logging, sink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    logging::init(&config);

    let store = sink::connect(&config).await?;
    let nodes = store.node_count().await?;
    let edges = store.edge_count().await?;

    println!("\n=== Wikigraph Store Statistics ===\n");
    println!("Backend:   {:?}", config.sink.backend);
    println!("Persons:   {}", nodes);
    println!("Relations: {}", edges);

    if config.sink.backend != SinkBackend::Sqlite {
        return Ok(());
    }

    // The SQLite store can also break relations down by type.
    let db = Db::new(&config.sink.sqlite_path);
    let (by_type, placeholders) = db
        .with_connection(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT relation_type, COUNT(*) AS count
                FROM relations
                GROUP BY relation_type
                ORDER BY count DESC, relation_type
                "#,
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

            let placeholders: i64 =
                conn.query_row("SELECT COUNT(*) FROM persons WHERE label IS NULL", [], |row| row.get(0))?;

            Ok::<_, WikigraphError>((rows, placeholders))
        })
        .await?;

    println!("Unlabelled persons: {}", placeholders);

    if by_type.is_empty() {
        println!("\nNo relations yet. Run `wikigraph run` to crawl.");
        return Ok(());
    }

    println!("\nRelations by type:\n");
    println!("{:-<30}", "");
    println!("{:<12} {:>10}", "Type", "Count");
    println!("{:-<30}", "");
    for (kind, count) in &by_type {
        println!("{:<12} {:>10}", kind, count);
    }
    println!("{:-<30}", "");

    Ok(())
}
