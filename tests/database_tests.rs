use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;
use journaldb::{Config, Database, Document, DocumentId, ErrorKind, SyncMode};

fn config(dir: &Path) -> Config {
    Config::new(dir.join("journal.db"))
        .with_sync_mode(SyncMode::None)
        .with_retry(3, Duration::from_millis(1))
}

fn open(dir: &Path) -> Database {
    Database::open(config(dir)).unwrap()
}

fn at(rfc3339: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(rfc3339).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn save_and_load_keeps_offset_and_outline() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let doc = Document::new("Reading list", at("2024-03-10T21:15:00.123456789+07:00"))
        .with_block("books", 0)
        .with_block("Dune", 1)
        .with_block("papers", 0);
    db.save(&doc).unwrap();

    let loaded = db.load_document(doc.id).unwrap();
    assert_eq!(loaded, doc);
    assert_eq!(loaded.date.offset().local_minus_utc(), 7 * 3600);
    assert_eq!(loaded.blocks[1].indent, 1);

    let by_title = db.load_document_by_title("READING LIST").unwrap();
    assert_eq!(by_title.id, doc.id);

    let missing = db.load_document(DocumentId::new()).unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);
}

#[test]
fn load_by_instant_matches_across_offsets() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let doc = Document::new("Standup", at("2024-05-01T09:00:00+02:00"));
    db.save(&doc).unwrap();

    let utc = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
    assert_eq!(db.load_document_at(&utc).unwrap().id, doc.id);

    let other = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 1).unwrap();
    assert!(db.load_document_at(&other).unwrap_err().is_not_found());
}

#[test]
fn duplicate_title_aborts_the_whole_save() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let first = Document::new("Groceries", at("2024-01-01T10:00:00Z"));
    db.save(&first).unwrap();

    let clash = Document::new("groceries", at("2024-01-02T10:00:00Z"))
        .with_block("see [[Milk]] /scheduled 2024-01-05", 0);
    let err = db.save(&clash).unwrap_err();
    assert!(err.is_duplicate_title());

    // Nothing from the rejected save is visible
    assert!(db.load_document(clash.id).unwrap_err().is_not_found());
    assert!(db.get_references("Milk").unwrap().is_empty());
    assert!(db.get_scheduled_tasks(day(2024, 1, 5), 1).unwrap().is_empty());
    assert_eq!(db.list_documents().unwrap().len(), 1);
    assert_eq!(db.get_recents().unwrap(), vec![first.id]);

    // Same document may keep its own title
    let mut edited = first.clone();
    edited.push_block("eggs", 0);
    db.save(&edited).unwrap();
    assert_eq!(db.load_document_by_title("Groceries").unwrap().blocks.len(), 1);
}

#[test]
fn rename_releases_the_old_title() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let mut doc = Document::new("Draft", at("2024-02-01T08:00:00Z"));
    db.save(&doc).unwrap();

    doc.title = "Final".into();
    db.save(&doc).unwrap();

    assert!(db.load_document_by_title("Draft").unwrap_err().is_not_found());
    assert_eq!(db.load_document_by_title("final").unwrap().id, doc.id);

    let reuse = Document::new("Draft", at("2024-02-02T08:00:00Z"));
    db.save(&reuse).unwrap();
}

#[test]
fn references_follow_edits() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let target = Document::new("Rust", at("2024-01-01T00:00:00Z"));
    let mut linker = Document::new("Notes", at("2024-01-02T00:00:00Z"))
        .with_block("see [[Rust]]", 0)
        .with_block("ownership rules", 1)
        .with_block("unrelated", 0);
    db.save(&target).unwrap();
    db.save(&linker).unwrap();

    assert_eq!(db.get_references("rust").unwrap(), vec![linker.id]);

    let contexts = db.get_reference_context("Rust").unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].title, "Notes");
    let texts: Vec<&str> = contexts[0].blocks.iter().map(|b| b.content.as_str()).collect();
    assert_eq!(texts, vec!["see [[Rust]]", "ownership rules"]);

    linker.blocks[0].content = "see nothing".into();
    db.save(&linker).unwrap();
    assert!(db.get_references("Rust").unwrap().is_empty());
}

#[test]
fn scheduled_tasks_follow_edits() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let mut doc = Document::new("Chores", at("2024-12-01T00:00:00Z"))
        .with_block("renew passport /scheduled 2024-12-31", 0)
        .with_block("taxes /scheduled 2025-01-02", 0);
    db.save(&doc).unwrap();

    let tasks = db.get_scheduled_tasks(day(2024, 12, 31), 3).unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].time, day(2024, 12, 31));
    assert_eq!(tasks[0].doc_id, doc.id);
    assert_eq!(tasks[0].block_id, doc.blocks[0].id);
    assert_eq!(tasks[1].time, day(2025, 1, 2));

    // A zero-day window covers nothing
    assert!(db.get_scheduled_tasks(day(2024, 12, 31), 0).unwrap().is_empty());

    doc.blocks[0].content = "renew passport /scheduled 2025-12-31".into();
    db.save(&doc).unwrap();
    assert_eq!(db.get_scheduled_tasks(day(2024, 12, 31), 1).unwrap().len(), 0);
    assert_eq!(db.get_scheduled_tasks(day(2025, 12, 31), 1).unwrap().len(), 1);

    // Dropping a block drops its tasks
    doc.blocks.remove(1);
    db.save(&doc).unwrap();
    assert!(db.get_scheduled_tasks(day(2025, 1, 2), 1).unwrap().is_empty());

    let upcoming = db.get_upcoming_tasks(day(2025, 12, 30), 2).unwrap();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0].title, "Chores");
    assert_eq!(upcoming[0].description, "renew passport /scheduled 2025-12-31");
}

#[test]
fn manual_schedules_live_until_delete() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let doc = Document::new("Plans", at("2024-06-01T00:00:00Z")).with_block("call the bank", 0);
    db.save(&doc).unwrap();

    let task = db.schedule_task(day(2024, 6, 3), doc.id, doc.blocks[0].id).unwrap();
    let tasks = db.get_scheduled_tasks(day(2024, 6, 3), 1).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task);

    // Survives a save that carries no marker
    db.save(&doc).unwrap();
    assert_eq!(db.get_scheduled_tasks(day(2024, 6, 3), 1).unwrap().len(), 1);

    let err = db.schedule_task(day(2024, 6, 3), DocumentId::new(), doc.blocks[0].id).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    db.delete(doc.id).unwrap();
    assert!(db.get_scheduled_tasks(day(2024, 6, 3), 1).unwrap().is_empty());
}

#[test]
fn delete_clears_every_index() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let doc = Document::journal("Tuesday, March 5, 2024", at("2024-03-05T07:30:00-05:00"))
        .with_block("met with [[Alice]] about quarterly planning", 0)
        .with_block("follow up /scheduled 2024-03-08", 1);
    db.save(&doc).unwrap();
    assert_eq!(db.search("quarterly").unwrap(), vec![doc.id]);

    db.delete(doc.id).unwrap();

    assert!(db.load_document(doc.id).unwrap_err().is_not_found());
    assert!(db.load_document_by_title("Tuesday, March 5, 2024").unwrap_err().is_not_found());
    assert!(db.load_document_at(&doc.date).unwrap_err().is_not_found());
    assert!(db.load_journals(day(2024, 3, 1), day(2024, 3, 31)).unwrap().is_empty());
    assert!(db.get_references("Alice").unwrap().is_empty());
    assert!(db.get_scheduled_tasks(day(2024, 3, 8), 1).unwrap().is_empty());
    assert!(db.get_recents().unwrap().is_empty());
    assert!(db.search("quarterly").unwrap().is_empty());

    assert!(db.delete(doc.id).unwrap_err().is_not_found());
}

#[test]
fn journals_by_day_range() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    for d in [1, 2, 3, 5] {
        let date = at(&format!("2024-04-{:02}T12:00:00+09:00", d));
        let doc = Document::journal(format!("April {}", d), date).with_block("entry", 0);
        db.save(&doc).unwrap();
    }
    db.save(&Document::new("Not a journal", at("2024-04-02T13:00:00+09:00"))).unwrap();

    let journals = db.load_journals(day(2024, 4, 2), day(2024, 4, 5)).unwrap();
    let titles: Vec<&str> = journals.iter().map(|d| d.title.as_str()).collect();
    assert_eq!(titles, vec!["April 2", "April 3", "April 5"]);

    assert!(db.load_journals(day(2024, 4, 6), day(2024, 4, 30)).unwrap().is_empty());

    let existing = db.journal_for_day(day(2024, 4, 3)).unwrap();
    assert_eq!(existing.title, "April 3");

    let fresh = db.journal_for_day(day(2024, 4, 4)).unwrap();
    assert!(fresh.is_journal);
    assert_eq!(fresh.title, "Thursday, April 4, 2024");
    assert_eq!(fresh.day(), day(2024, 4, 4));
    assert_eq!(fresh.blocks.len(), 1);
    assert!(db.load_document(fresh.id).unwrap_err().is_not_found());
}

#[test]
fn recents_are_bounded_and_most_recent_first() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(config(dir.path()).with_recents_capacity(3)).unwrap();

    let docs: Vec<Document> = (0..4)
        .map(|i| Document::new(format!("Page {}", i), at(&format!("2024-07-0{}T00:00:00Z", i + 1))))
        .collect();
    for doc in &docs {
        db.save(doc).unwrap();
    }
    assert_eq!(db.get_recents().unwrap(), vec![docs[3].id, docs[2].id, docs[1].id]);

    db.touch_recent(docs[1].id).unwrap();
    assert_eq!(db.get_recents().unwrap(), vec![docs[1].id, docs[3].id, docs[2].id]);

    let opened = db.open_document_by_title("page 2").unwrap();
    assert_eq!(opened.id, docs[2].id);
    assert_eq!(db.get_recents().unwrap()[0], docs[2].id);

    let created = db.open_document_by_title("Brand new").unwrap();
    assert_eq!(created.blocks.len(), 1);
    assert_eq!(db.load_document_by_title("brand new").unwrap().id, created.id);
    assert_eq!(db.get_recents().unwrap()[0], created.id);
}

#[test]
fn search_by_content_title_fuzzy_and_phrase() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let garden = Document::new("Garden", at("2024-08-01T00:00:00Z"))
        .with_block("planted tomatoes and basil", 0)
        .with_block("the quick brown fox visited", 1);
    let kitchen = Document::new("Kitchen tomatoes", at("2024-08-02T00:00:00Z"))
        .with_block("sauce recipe", 0);
    let other = Document::new("Errands", at("2024-08-03T00:00:00Z"))
        .with_block("brown bread, quick stop", 0);
    for doc in [&garden, &kitchen, &other] {
        db.save(doc).unwrap();
    }

    // Title hits outrank content hits
    assert_eq!(db.search("tomatoes").unwrap(), vec![kitchen.id, garden.id]);

    // One typo is tolerated
    assert_eq!(db.search("basli").unwrap(), vec![garden.id]);

    // Phrase needs adjacency; loose tokens do not
    assert_eq!(db.search("\"quick brown\"").unwrap(), vec![garden.id]);
    let loose = db.search("quick brown").unwrap();
    assert_eq!(loose.len(), 2);

    // Every clause must match
    assert!(db.search("tomatoes sauce zzzzzz").unwrap().is_empty());
    assert!(db.search("   ").unwrap().is_empty());
    assert!(db.search("a").unwrap().is_empty());

    let summaries = db.search_summaries("recipe").unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title, "Kitchen tomatoes");
}

#[test]
fn edits_replace_search_terms() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    let mut doc = Document::new("Log", at("2024-09-01T00:00:00Z")).with_block("meteorology", 0);
    db.save(&doc).unwrap();
    assert_eq!(db.search("meteorology").unwrap(), vec![doc.id]);

    doc.blocks[0].content = "astronomy".into();
    db.save(&doc).unwrap();
    assert!(db.search("meteorology").unwrap().is_empty());
    assert_eq!(db.search("astronomy").unwrap(), vec![doc.id]);
}

#[test]
fn reindex_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());

    for i in 0..5 {
        let doc = Document::new(format!("Note {}", i), at(&format!("2024-10-0{}T00:00:00Z", i + 1)))
            .with_block(format!("shared keyword number{}", i), 0);
        db.save(&doc).unwrap();
    }

    let before = db.search("keyword").unwrap();
    assert_eq!(db.reindex_search().unwrap(), 5);
    assert_eq!(db.reindex_search().unwrap(), 5);
    assert_eq!(db.search("keyword").unwrap(), before);
    assert!(db.get_index_health().is_healthy);
    assert_eq!(db.retry_failed_indexing().unwrap(), 0);
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let doc = Document::journal("Sunday", at("2024-11-03T20:00:00-08:00"))
        .with_block("lighthouse trip with [[Sam]] /scheduled 2024-11-10", 0);

    {
        let db = open(dir.path());
        db.save(&doc).unwrap();
        db.close().unwrap();
    }

    let db = open(dir.path());
    assert_eq!(db.load_document(doc.id).unwrap(), doc);
    assert_eq!(db.get_references("sam").unwrap(), vec![doc.id]);
    assert_eq!(db.get_scheduled_tasks(day(2024, 11, 10), 1).unwrap().len(), 1);
    assert_eq!(db.load_journals(day(2024, 11, 3), day(2024, 11, 3)).unwrap().len(), 1);
    assert_eq!(db.get_recents().unwrap(), vec![doc.id]);
    assert_eq!(db.search("lighthouse").unwrap(), vec![doc.id]);
    assert!(db.get_index_health().is_healthy);
}

#[test]
fn search_log_replays_without_clean_close() {
    let dir = TempDir::new().unwrap();
    let doc = Document::new("Unflushed", at("2024-11-04T00:00:00Z")).with_block("harbor", 0);

    {
        let db = open(dir.path());
        db.save(&doc).unwrap();
        // Dropped without close
    }

    let db = open(dir.path());
    assert_eq!(db.search("harbor").unwrap(), vec![doc.id]);
}

#[test]
fn corrupt_search_segment_needs_reindex() {
    let dir = TempDir::new().unwrap();
    let doc = Document::new("Recipes", at("2024-12-01T00:00:00Z")).with_block("sourdough starter", 0);

    let search_dir = {
        let db = open(dir.path());
        db.save(&doc).unwrap();
        let search_dir = db.storage_layout().search_dir.clone();
        db.close().unwrap();
        search_dir
    };

    fs::write(search_dir.join("segment.bin"), b"definitely not a segment").unwrap();

    let db = open(dir.path());
    let health = db.get_index_health();
    assert!(!health.is_healthy);
    assert!(health.requires_reindex);
    assert!(db.search("sourdough").unwrap().is_empty());

    // Documents themselves are untouched
    assert_eq!(db.load_document(doc.id).unwrap(), doc);

    assert_eq!(db.reindex_search().unwrap(), 1);
    assert!(db.get_index_health().is_healthy);
    assert_eq!(db.search("sourdough").unwrap(), vec![doc.id]);
}

#[test]
fn saves_without_a_search_index_do_not_wait_on_retries() {
    let dir = TempDir::new().unwrap();
    let search_dir = {
        let db = open(dir.path());
        db.save(&Document::new("Seed", at("2024-12-01T00:00:00Z"))).unwrap();
        let search_dir = db.storage_layout().search_dir.clone();
        db.close().unwrap();
        search_dir
    };
    fs::write(search_dir.join("segment.bin"), b"garbage").unwrap();

    let db = Database::open(config(dir.path()).with_retry(3, Duration::from_millis(100))).unwrap();
    let start = Instant::now();
    for i in 0..3 {
        db.save(&Document::new(format!("Offline {}", i), at("2024-12-02T00:00:00Z"))).unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(300), "saves took {:?}", start.elapsed());

    let health = db.get_index_health();
    assert!(health.requires_reindex);
    assert_eq!(health.failed_documents, 3);
    assert_eq!(db.list_documents().unwrap().len(), 4);
}

#[test]
fn search_log_stays_bounded_across_repeated_saves() {
    let dir = TempDir::new().unwrap();
    let db = open(dir.path());
    let log_path = db.storage_layout().search_dir.join("ops.log");

    let mut doc = Document::new("Long draft", at("2024-12-03T08:00:00Z"))
        .with_block("tide tables and harbor notes ".repeat(350), 0);
    for i in 0..200 {
        doc.blocks[0].content = format!("revision {} {}", i, "tide tables and harbor notes ".repeat(350));
        db.save(&doc).unwrap();
    }

    let log_len = fs::metadata(&log_path).unwrap().len();
    assert!(log_len < 1024 * 1024, "search log grew to {} bytes", log_len);
    drop(db);

    let db = open(dir.path());
    assert_eq!(db.search("harbor").unwrap(), vec![doc.id]);
}

#[test]
fn concurrent_saves_searches_and_reindex() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open(dir.path()));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..25 {
                    let date = Utc.with_ymd_and_hms(2024, 1, 1, t, i, 0).unwrap().fixed_offset();
                    let doc = Document::new(format!("Thread {} note {}", t, i), date)
                        .with_block("concurrent harvest", 0);
                    db.save(&doc).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..50 {
                db.search("harvest").unwrap();
            }
        })
    };

    let rebuilder = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..3 {
                db.reindex_search().unwrap();
            }
        })
    };

    for handle in writers {
        handle.join().unwrap();
    }
    reader.join().unwrap();
    rebuilder.join().unwrap();

    assert_eq!(db.list_documents().unwrap().len(), 100);

    assert!(db.get_index_health().is_healthy);
    assert_eq!(db.search("harvest").unwrap().len(), db.config().search_result_limit.min(100));
}
