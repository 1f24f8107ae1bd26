//! Count checks, assembly and completion reporting over a populated ledger.

mod common;

use common::*;
use ocr_ledger::{
    AssemblyOutcome, CountStatus, Ledger, Orchestrator, PageSeparator, Reconciler, SqliteLedger,
};
use std::sync::Arc;
use tokio_test::assert_ok;

async fn memory_ledger() -> Arc<SqliteLedger> {
    Arc::new(SqliteLedger::in_memory().await.unwrap())
}

/// Issue `filename` declaring `declared` pages, with success rows for `recorded`.
async fn seed(ledger: &SqliteLedger, filename: &str, declared: Option<u32>, recorded: &[u32]) {
    let id = issue_id(ledger, filename).await;
    if let Some(n) = declared {
        ledger.set_page_count(id, n).await.unwrap();
    }
    for &page in recorded {
        ledger
            .record_page(id, page, &page_text(page), false)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn short_issue_is_reported_and_not_assembled() {
    let ledger = memory_ledger().await;
    seed(&ledger, "issue-9.pdf", Some(5), &[1, 2, 3, 4]).await;
    let out = tempfile::tempdir().unwrap();
    let sources = batch_dir(&["issue-9.pdf"]);

    let reconciler = Reconciler::new(ledger.clone());
    let checks = reconciler.check_counts(sources.path()).await.unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(
        checks[0].status,
        CountStatus::Mismatch {
            expected: 5,
            persisted: 4
        }
    );
    assert!(!checks[0].backfilled);

    let reports = reconciler
        .assemble_all(out.path(), &PageSeparator::Blank)
        .await
        .unwrap();
    assert_eq!(
        reports[0].outcome,
        AssemblyOutcome::Incomplete {
            expected: 5,
            persisted: 4
        }
    );
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn assembly_orders_pages_and_omits_error_rows() {
    let ledger = memory_ledger().await;
    let id = issue_id(&*ledger, "issue-3.pdf").await;
    ledger.set_page_count(id, 4).await.unwrap();
    // Recorded out of order, as concurrent workers would.
    for page in [3, 1, 4] {
        ledger
            .record_page(id, page, &page_text(page), false)
            .await
            .unwrap();
    }
    ledger
        .record_page(id, 2, "ERROR: empty response from recognition service", true)
        .await
        .unwrap();

    let out = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(ledger.clone());
    let reports = reconciler
        .assemble_all(out.path(), &PageSeparator::Blank)
        .await
        .unwrap();

    let path = out.path().join("issue-3.md");
    assert_eq!(
        reports[0].outcome,
        AssemblyOutcome::Written {
            path: path.clone(),
            pages: 3
        }
    );
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, "text of page 1\n\ntext of page 3\n\ntext of page 4\n");
    assert!(!text.contains("ERROR"));
}

#[tokio::test]
async fn assembly_never_rewrites_existing_output() {
    let ledger = memory_ledger().await;
    seed(&ledger, "issue-1.pdf", Some(2), &[1, 2]).await;
    let out = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(ledger.clone());

    let first = assert_ok!(
        reconciler
            .assemble_all(out.path(), &PageSeparator::HorizontalRule)
            .await
    );
    assert!(matches!(first[0].outcome, AssemblyOutcome::Written { .. }));
    let path = out.path().join("issue-1.md");
    std::fs::write(&path, "edited by hand").unwrap();

    let second = reconciler
        .assemble_all(out.path(), &PageSeparator::HorizontalRule)
        .await
        .unwrap();
    assert_eq!(
        second[0].outcome,
        AssemblyOutcome::AlreadyAssembled { path: path.clone() }
    );
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "edited by hand");
}

#[tokio::test]
async fn unknown_page_count_blocks_assembly() {
    let ledger = memory_ledger().await;
    seed(&ledger, "issue-1.pdf", None, &[1]).await;
    let out = tempfile::tempdir().unwrap();

    let reports = Reconciler::new(ledger.clone())
        .assemble_all(out.path(), &PageSeparator::Blank)
        .await
        .unwrap();
    assert_eq!(reports[0].outcome, AssemblyOutcome::UnknownPageCount);
}

#[tokio::test]
async fn null_page_count_is_backfilled_from_source() {
    let ledger = memory_ledger().await;
    seed(&ledger, "issue-2.pdf", None, &[1, 2]).await;
    let sources = batch_dir(&["issue-2.pdf"]);
    let source = FakeSource::new().with_document("issue-2.pdf", 2);

    let reconciler = Reconciler::new(ledger.clone()).with_source(source.clone());
    let checks = reconciler.check_counts(sources.path()).await.unwrap();
    assert!(checks[0].backfilled);
    assert_eq!(checks[0].num_pages, Some(2));
    assert!(checks[0].is_complete());

    let issue = ledger.get_or_create_issue("issue-2.pdf").await.unwrap();
    assert_eq!(issue.num_pages, Some(2));

    // Second pass has nothing left to fix.
    let again = reconciler.check_counts(sources.path()).await.unwrap();
    assert!(!again[0].backfilled);
    assert_eq!(source.opens.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn declared_mismatch_is_never_corrected() {
    let ledger = memory_ledger().await;
    seed(&ledger, "issue-4.pdf", Some(5), &[1, 2, 3]).await;
    let sources = batch_dir(&["issue-4.pdf"]);
    let source = FakeSource::new().with_document("issue-4.pdf", 3);

    let reconciler = Reconciler::new(ledger.clone()).with_source(source.clone());
    let checks = reconciler.check_counts(sources.path()).await.unwrap();
    assert_eq!(
        checks[0].status,
        CountStatus::Mismatch {
            expected: 5,
            persisted: 3
        }
    );
    assert_eq!(source.opens.load(std::sync::atomic::Ordering::SeqCst), 0);
    let issue = ledger.get_or_create_issue("issue-4.pdf").await.unwrap();
    assert_eq!(issue.num_pages, Some(5));
}

#[tokio::test]
async fn unresolvable_page_counts_are_reported() {
    let ledger = memory_ledger().await;
    seed(&ledger, "missing.pdf", None, &[]).await;
    seed(&ledger, "broken.pdf", None, &[]).await;
    seed(&ledger, "nosource.pdf", None, &[]).await;
    let sources = batch_dir(&["broken.pdf", "nosource.pdf"]);
    let source = FakeSource::new().with_document("broken.pdf", 2);
    source.make_unreadable("broken.pdf");

    let with_source = Reconciler::new(ledger.clone()).with_source(source);
    let checks = with_source.check_counts(sources.path()).await.unwrap();
    let by_name = |name: &str| {
        checks
            .iter()
            .find(|c| c.filename == name)
            .map(|c| c.status.clone())
            .unwrap()
    };
    assert!(matches!(by_name("missing.pdf"), CountStatus::SourceMissing { .. }));
    assert!(matches!(by_name("broken.pdf"), CountStatus::SourceUnreadable { .. }));

    let ledger_only = Reconciler::new(ledger.clone());
    let checks = ledger_only.check_counts(sources.path()).await.unwrap();
    let nosource = checks.iter().find(|c| c.filename == "nosource.pdf").unwrap();
    assert!(matches!(nosource.status, CountStatus::SourceUnreadable { .. }));
    assert_eq!(nosource.num_pages, None);
}

#[tokio::test]
async fn failed_backfill_is_reported_and_the_pass_continues() {
    let ledger = FlakyLedger::new().await;
    let raced = issue_id(&*ledger, "a.pdf").await;
    let b = issue_id(&*ledger, "b.pdf").await;
    for page in [1, 2] {
        ledger
            .record_page(b, page, &page_text(page), false)
            .await
            .unwrap();
    }
    // A concurrent run declares a different count for a.pdf first.
    ledger.race_page_count(raced, 7);

    let sources = batch_dir(&["a.pdf", "b.pdf"]);
    let source = FakeSource::new()
        .with_document("a.pdf", 2)
        .with_document("b.pdf", 2);
    let checks = assert_ok!(
        Reconciler::new(ledger.clone())
            .with_source(source)
            .check_counts(sources.path())
            .await
    );
    assert_eq!(checks.len(), 2);

    let a = checks.iter().find(|c| c.filename == "a.pdf").unwrap();
    assert!(matches!(a.status, CountStatus::BackfillFailed { .. }));
    assert!(!a.backfilled);
    assert_eq!(a.num_pages, None);

    let b = checks.iter().find(|c| c.filename == "b.pdf").unwrap();
    assert!(b.backfilled);
    assert!(b.is_complete());

    let stored = ledger.get_or_create_issue("a.pdf").await.unwrap();
    assert_eq!(stored.num_pages, Some(7));
}

#[tokio::test]
async fn completion_summary_counts_declared_and_persisted() {
    let ledger = memory_ledger().await;
    seed(&ledger, "a.pdf", Some(3), &[1, 2, 3]).await;
    seed(&ledger, "b.pdf", Some(2), &[1]).await;
    seed(&ledger, "c.pdf", None, &[]).await;

    let summary = Reconciler::new(ledger.clone())
        .completion_summary()
        .await
        .unwrap();
    assert_eq!(summary.issues, 3);
    assert_eq!(summary.issues_without_page_count, 1);
    assert_eq!(summary.declared_pages, 5);
    assert_eq!(summary.persisted_pages, 4);
    assert!((summary.percent_complete - 80.0).abs() < 1e-9);
}

#[tokio::test]
async fn empty_ledger_summary_is_zero() {
    let summary = Reconciler::new(memory_ledger().await)
        .completion_summary()
        .await
        .unwrap();
    assert_eq!(summary.issues, 0);
    assert_eq!(summary.percent_complete, 0.0);
}

#[tokio::test]
async fn pipeline_output_assembles_end_to_end() {
    let names = ["issue-1.pdf", "issue-2.pdf"];
    let dir = batch_dir(&names);
    let source = FakeSource::new()
        .with_document("issue-1.pdf", 3)
        .with_document("issue-2.pdf", 2);
    let recognizer = ScriptedRecognizer::new();
    recognizer.script(2, Behaviour::Empty);
    let ledger = memory_ledger().await;

    Orchestrator::new(source.clone(), recognizer, ledger.clone(), fast_config())
        .run_directory(dir.path())
        .await
        .unwrap();

    let reconciler = Reconciler::new(ledger.clone()).with_source(source);
    let checks = reconciler.check_counts(dir.path()).await.unwrap();
    assert!(checks.iter().all(|c| c.is_complete()));

    let out = tempfile::tempdir().unwrap();
    let reports = reconciler
        .assemble_all(out.path(), &PageSeparator::Comment)
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(
        std::fs::read_to_string(out.path().join("issue-1.md")).unwrap(),
        "text of page 1\n\n<!-- page 3 -->\n\ntext of page 3\n"
    );
    assert_eq!(
        std::fs::read_to_string(out.path().join("issue-2.md")).unwrap(),
        "text of page 1\n"
    );
}
