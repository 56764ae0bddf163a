//! Integration tests for subscription management: add, delete, OPML import,
//! and persistence of the store document.

use feedme::feed::{import_file, parse_feed_list};
use feedme::library::{ImportSummary, Library, LibraryError, LibraryOptions, ValidationError};
use feedme::storage::{Collection, Episode, Store, Subscription};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn temp_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedme_it_subs_{}_{}", test, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn open(dir: &std::path::Path) -> Library {
    let store = Store::new(dir.join("subscriptions.json"), 100);
    Library::open(store, reqwest::Client::new(), LibraryOptions::default()).await
}

const OPML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Podcasts</title></head>
  <body>
    <outline text="Tech">
      <outline title="Rust Radio" xmlUrl="https://example.com/rust.xml"/>
      <outline text="Systems Talk" xmlUrl="https://example.com/systems.xml"/>
    </outline>
    <outline title="No Url"/>
    <outline title="Existing" xmlUrl="https://example.com/existing-new.xml"/>
  </body>
</opml>"#;

#[tokio::test]
async fn test_add_persists_across_reopen() {
    let dir = temp_dir("add_reopen");
    {
        let lib = open(&dir).await;
        lib.add_subscription("Rust Radio", "https://example.com/rust.xml")
            .await
            .unwrap();
    }

    let lib = open(&dir).await;
    let subs = lib.subscriptions().await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].name, "Rust Radio");
    assert_eq!(subs[0].url, "https://example.com/rust.xml");
    assert!(!subs[0].has_unread());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_duplicate_add_keeps_original() {
    let dir = temp_dir("dup_add");
    let lib = open(&dir).await;
    lib.add_subscription("Show", "https://example.com/one.xml").await.unwrap();

    let err = lib
        .add_subscription("Show", "https://example.com/two.xml")
        .await
        .unwrap_err();
    assert!(matches!(err, LibraryError::Validation(ValidationError::DuplicateName(_))));

    let reopened = open(&dir).await;
    assert_eq!(reopened.subscriptions().await[0].url, "https://example.com/one.xml");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_opml_import_overwrites_same_names() {
    let dir = temp_dir("import");
    let opml_path = dir.join("feeds.opml");
    std::fs::write(&opml_path, OPML).unwrap();

    let mut initial = Collection::new();
    let mut existing = Subscription::new("https://example.com/existing-old.xml");
    existing.episodes = vec![Episode {
        title: "Heard it".to_string(),
        link: "https://example.com/heard".to_string(),
        read: true,
        ..Default::default()
    }];
    initial.insert("Existing".to_string(), existing);
    initial.insert("Untouched".to_string(), Subscription::new("https://example.com/untouched.xml"));
    Store::new(dir.join("subscriptions.json"), 100)
        .save(&mut initial)
        .await
        .unwrap();

    let lib = open(&dir).await;
    let entries = import_file(&opml_path).await.unwrap();
    assert_eq!(entries.len(), 3);
    let summary = lib.import(entries).await.unwrap();
    assert_eq!(summary, ImportSummary { added: 2, overwritten: 1 });

    let reopened = open(&dir).await;
    let names: Vec<String> = reopened.subscriptions().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Existing", "Rust Radio", "Systems Talk", "Untouched"]);
    let existing = reopened.episodes("Existing").await.unwrap();
    assert!(existing.is_empty());
    let snapshot = reopened.snapshot().await;
    assert_eq!(snapshot["Existing"].url, "https://example.com/existing-new.xml");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_import_of_empty_list_changes_nothing() {
    let dir = temp_dir("import_empty");
    let lib = open(&dir).await;
    let entries = parse_feed_list("<opml><body></body></opml>").unwrap();
    let summary = lib.import(entries).await.unwrap();
    assert_eq!(summary, ImportSummary::default());
    assert!(!dir.join("subscriptions.json").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_delete_then_reopen() {
    let dir = temp_dir("delete");
    let lib = open(&dir).await;
    lib.add_subscription("Keep", "https://example.com/keep.xml").await.unwrap();
    lib.add_subscription("Drop", "https://example.com/drop.xml").await.unwrap();
    lib.delete_subscription("Drop").await.unwrap();

    let reopened = open(&dir).await;
    let names: Vec<String> = reopened.subscriptions().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Keep"]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_corrupt_store_opens_empty_and_is_preserved() {
    let dir = temp_dir("corrupt");
    std::fs::write(dir.join("subscriptions.json"), "{ definitely not json").unwrap();

    let lib = open(&dir).await;
    assert!(lib.subscriptions().await.is_empty());

    let preserved: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("subscriptions.json.corrupt."))
        .collect();
    assert_eq!(preserved.len(), 1);

    lib.add_subscription("Fresh", "https://example.com/fresh.xml").await.unwrap();
    let reopened = open(&dir).await;
    assert_eq!(reopened.subscriptions().await.len(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_concurrent_toggles_are_not_lost() {
    let dir = temp_dir("concurrent");
    let mut initial = Collection::new();
    let mut show = Subscription::new("https://example.com/show.xml");
    show.episodes = (0..20)
        .map(|i| Episode {
            title: format!("Episode {i}"),
            link: format!("https://example.com/ep/{i}"),
            ..Default::default()
        })
        .collect();
    initial.insert("Show".to_string(), show);
    Store::new(dir.join("subscriptions.json"), 100)
        .save(&mut initial)
        .await
        .unwrap();

    let lib = std::sync::Arc::new(open(&dir).await);
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let lib = std::sync::Arc::clone(&lib);
            tokio::spawn(async move { lib.toggle_read("Show", i, true).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let reopened = open(&dir).await;
    let episodes = reopened.episodes("Show").await.unwrap();
    assert!(episodes.iter().all(|e| e.read));
    let _ = std::fs::remove_dir_all(&dir);
}
