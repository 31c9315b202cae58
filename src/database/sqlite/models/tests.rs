use super::*;

fn row(local_id: i64, text: &str) -> ChunkRow {
    ChunkRow {
        local_id,
        page_number: local_id * 10,
        text: text.to_string(),
    }
}

#[test]
fn order_by_rank_follows_ranked_ids() {
    let rows = vec![row(0, "a"), row(1, "b"), row(2, "c")];
    let ordered = order_by_rank(&[2, 0, 1], rows, |r| r.local_id);

    let texts: Vec<&str> = ordered.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["c", "a", "b"]);
}

#[test]
fn order_by_rank_drops_unknown_ids() {
    let rows = vec![row(3, "d"), row(5, "f")];
    let ordered = order_by_rank(&[5, 4, 3, 9], rows, |r| r.local_id);

    let ids: Vec<i64> = ordered.iter().map(|r| r.local_id).collect();
    assert_eq!(ids, vec![5, 3]);
}

#[test]
fn order_by_rank_ignores_rows_not_requested() {
    let rows = vec![row(1, "b"), row(7, "h")];
    let ordered = order_by_rank(&[1], rows, |r| r.local_id);

    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0].text, "b");
}

#[test]
fn hit_conversions() {
    let document_hit = DocumentHit::from(RootHitRow {
        root_vector_id: 4,
        document_id: "doc-4".to_string(),
        summary: "a summary".to_string(),
    });
    assert_eq!(document_hit.document_id, "doc-4");
    assert_eq!(document_hit.summary, "a summary");

    let chunk_hit = ChunkHit::from(row(2, "hello"));
    assert_eq!(
        chunk_hit,
        ChunkHit {
            page_number: 20,
            text: "hello".to_string()
        }
    );
}

#[test]
fn hits_serialize_with_field_names() {
    let hit = ChunkHit {
        page_number: 0,
        text: "hello".to_string(),
    };
    let json = serde_json::to_value(&hit).expect("should serialize chunk hit");
    assert_eq!(json["page_number"], 0);
    assert_eq!(json["text"], "hello");
}
