/// journaldb walkthrough
///
/// Demonstrates the main operations:
/// - Saving pages and journals
/// - Title, date and day-range lookups
/// - References and scheduled tasks
/// - Full-text search and index health
/// - Recents and delete

use chrono::{DateTime, NaiveDate};
use journaldb::{Config, Database, Document};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let dir = tempfile::tempdir()?;
    let db = Database::open(Config::new(dir.path().join("journal.db")))?;
    println!("Opened store in {}\n", dir.path().display());

    // Step 1: pages and journals
    let project = Document::new("Lighthouse project", DateTime::parse_from_rfc3339("2024-11-01T09:00:00+01:00")?)
        .with_block("goals", 0)
        .with_block("restore the lamp room", 1)
        .with_block("paint the tower", 1);
    db.save(&project)?;

    let monday = Document::journal("Monday, November 4, 2024", DateTime::parse_from_rfc3339("2024-11-04T08:30:00+01:00")?)
        .with_block("call with the contractor about [[Lighthouse project]]", 0)
        .with_block("send the quote /scheduled 2024-11-06", 1)
        .with_block("groceries", 0);
    db.save(&monday)?;
    println!("Saved {} documents", db.list_documents()?.len());

    // Step 2: lookups
    let by_title = db.load_document_by_title("lighthouse PROJECT")?;
    println!("By title: {} ({} blocks)", by_title.title, by_title.blocks.len());

    let nov = |d| NaiveDate::from_ymd_opt(2024, 11, d).ok_or("bad date");
    for journal in db.load_journals(nov(1)?, nov(30)?)? {
        println!("Journal: {}", journal.title);
    }

    // Step 3: references and tasks
    for context in db.get_reference_context("Lighthouse project")? {
        println!("Referenced from '{}':", context.title);
        for block in context.blocks {
            println!("  {}{}", "  ".repeat(block.indent as usize), block.content);
        }
    }
    for upcoming in db.get_upcoming_tasks(nov(4)?, 7)? {
        println!("Due {}: {} ({})", upcoming.task.time, upcoming.description, upcoming.title);
    }

    // Step 4: search
    for query in ["lamp", "contractr", "\"paint the tower\"", "quote groceries"] {
        let hits = db.search_summaries(query)?;
        let titles: Vec<&str> = hits.iter().map(|s| s.title.as_str()).collect();
        println!("search {:<20} -> {:?}", query, titles);
    }
    let health = db.get_index_health();
    println!("Index healthy: {} ({})", health.is_healthy, health.message);

    // Step 5: recents and delete
    db.touch_recent(project.id)?;
    println!("Recents: {:?}", db.get_recents()?);

    db.delete(monday.id)?;
    println!("After delete: {} tasks, {} references",
        db.get_scheduled_tasks(nov(6)?, 1)?.len(),
        db.get_references("Lighthouse project")?.len());

    db.close()?;
    println!("\nDone!");
    Ok(())
}
