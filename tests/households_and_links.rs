//! End-to-end stages: households feeding contacts, and content links that
//! need the related-id lookup.

use std::sync::Arc;

mod support;

use support::{account, ScriptedStore};
use stagelift_rs::{
    cluster_households, EntityKind, Placeholder, Plan, RelationshipEdge, SourceRef, Stage,
    TargetId, UploadConfig, UploadRecord, Uploader,
};
use tempfile::tempdir;

fn config_in(dir: &std::path::Path) -> UploadConfig {
    UploadConfig {
        state_path: dir.join("uploader.json"),
        dump_dir: Some(dir.join("dumps")),
        ..UploadConfig::default()
    }
}

#[test]
fn household_members_share_one_account() -> anyhow::Result<()> {
    let people: Vec<SourceRef> = ["A", "B", "C", "D", "E", "F"]
        .into_iter()
        .map(SourceRef::from)
        .collect();
    let edges = vec![
        RelationshipEdge::new("r1", "A", "B", Some(1)),
        RelationshipEdge::new("r2", "C", "B", Some(0)),
        RelationshipEdge::new("r3", "D", "C", Some(2)),
        RelationshipEdge::new("r4", "E", "Z", Some(1)),
    ];
    let households = cluster_households(&people, &edges)?;
    assert_eq!(households.len(), 4);
    let cd = households.cluster_for(&SourceRef::from("D")).expect("D clustered");
    assert_eq!(cd.head, SourceRef::from("C"));
    assert_eq!(cd.synthetic_ref(), SourceRef::from("SynthHHC"));

    let accounts: Vec<UploadRecord> = households
        .clusters
        .iter()
        .map(|cluster| account(cluster.synthetic_ref().as_str()))
        .collect();
    let mut contacts = Vec::new();
    for person in &people {
        let cluster = households.cluster_for(person).expect("every person clustered");
        contacts.push(
            UploadRecord::new(EntityKind::Contact)
                .with_text("AccountRef", person.as_str())
                .with_reference("AccountId", cluster.member_placeholder()?),
        );
    }

    let dir = tempdir()?;
    let store = Arc::new(ScriptedStore::new());
    let uploader = Uploader::open(config_in(dir.path()), store.clone())?;
    let mut plan = Plan::new(vec![
        Stage::new(EntityKind::Contact, contacts),
        Stage::new(EntityKind::Account, accounts),
    ]);
    uploader.upload(&mut plan)?;

    let account_of = |person: &str| -> Option<String> {
        store
            .submitted()
            .into_iter()
            .find(|record| record.kind == EntityKind::Contact && record.text("AccountRef") == Some(person))
            .and_then(|record| record.text("AccountId").map(str::to_string))
    };
    assert_eq!(account_of("A"), account_of("B"));
    assert_eq!(account_of("C"), account_of("D"));
    assert_ne!(account_of("A"), account_of("C"));
    assert_eq!(
        account_of("A").map(TargetId::new),
        store.get(EntityKind::Account, "SynthHHA")
    );
    Ok(())
}

fn version(reference: &str) -> UploadRecord {
    UploadRecord::new(EntityKind::ContentVersion)
        .with_text("SourceRef", reference)
        .with_text("PathOnClient", format!("{reference}.pdf"))
}

fn link(version_ref: &str, account_ref: &str) -> UploadRecord {
    UploadRecord::new(EntityKind::ContentDocumentLink)
        .with_reference(
            "ContentDocumentId",
            Placeholder::NeedsReplacement(SourceRef::from(version_ref)),
        )
        .with_reference(
            "LinkedEntityId",
            Placeholder::NeedsReplacement(SourceRef::from(account_ref)),
        )
}

fn link_plan() -> Plan {
    Plan::new(vec![
        Stage::new(EntityKind::Account, vec![account("a1")]),
        Stage::new(EntityKind::ContentVersion, vec![version("v1")]),
        Stage::new(EntityKind::ContentDocumentLink, vec![link("v1", "a1")]),
    ])
}

#[test]
fn content_links_point_at_looked_up_documents() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = config_in(dir.path());
    let store = Arc::new(ScriptedStore::new());
    let uploader = Uploader::open(config.clone(), store.clone())?;
    let reports = uploader.upload(&mut link_plan())?;
    assert!(reports
        .iter()
        .any(|report| report.stage == "content_document_link-lookup"));

    let version_id = store
        .get(EntityKind::ContentVersion, "v1")
        .expect("version uploaded");
    assert_eq!(store.lookups(), vec![version_id.clone()]);

    let submitted = store.submitted();
    let uploaded_link = submitted
        .iter()
        .find(|record| record.kind == EntityKind::ContentDocumentLink)
        .expect("link uploaded");
    let document_id = format!("doc-{version_id}");
    assert_eq!(uploaded_link.text("ContentDocumentId"), Some(document_id.as_str()));

    // The lookup is repeated on resume; the link itself is not resubmitted.
    let resumed = Uploader::open(config, store.clone())?;
    resumed.upload(&mut link_plan())?;
    assert_eq!(store.lookups().len(), 2);
    assert_eq!(store.submitted().len(), submitted.len());
    Ok(())
}
