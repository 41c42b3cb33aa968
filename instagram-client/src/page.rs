use gramfeed_core::{CoreError, InstagramApiError};
use serde_json::Value;

/// Raw nodes plus pagination info pulled out of one API response, before
/// any per-post normalization.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    pub nodes: Vec<Value>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub user_id: Option<String>,
}

/// Parse one response body into a [`RawPage`].
///
/// The API has shipped several response formats over time; shape detection
/// is tried in order and kept apart from business logic:
///   (a) `result.edges[]` of `{node}` wrappers (GraphQL style),
///   (b) `result.posts[]` / `result.reels[]` / `result.items[]` direct lists,
///   (c) `result` itself being a list (no pagination info at all).
pub fn parse_page(body: &Value) -> Result<RawPage, CoreError> {
    let result = body.get("result").ok_or_else(|| {
        InstagramApiError::InvalidResponse {
            details: "response has no result envelope".to_string(),
        }
    })?;

    if let Some(list) = result.as_array() {
        // Shape (c): a bare list is a single page.
        return Ok(RawPage {
            nodes: list.to_vec(),
            end_cursor: None,
            has_next_page: false,
            user_id: None,
        });
    }

    let user_id = result
        .get("id")
        .map(value_to_string)
        .filter(|id| !id.is_empty());

    let edges = extract_edges(result);
    if edges.is_empty() {
        tracing::warn!("no posts found in response envelope");
        return Ok(RawPage {
            nodes: Vec::new(),
            end_cursor: None,
            has_next_page: false,
            user_id,
        });
    }

    let nodes = edges
        .into_iter()
        .map(|edge| match edge.get("node") {
            Some(node) => node.clone(),
            None => edge,
        })
        .filter(|node| node.is_object())
        .collect();

    let (has_next_page, end_cursor) = extract_pagination(result);

    Ok(RawPage {
        nodes,
        end_cursor,
        has_next_page,
        user_id,
    })
}

fn extract_edges(result: &Value) -> Vec<Value> {
    for key in ["edges", "posts", "reels", "items"] {
        if let Some(list) = result.get(key).and_then(Value::as_array) {
            if !list.is_empty() {
                return list.to_vec();
            }
        }
    }
    Vec::new()
}

fn extract_pagination(result: &Value) -> (bool, Option<String>) {
    if let Some(page_info) = result.get("page_info").and_then(Value::as_object) {
        let has_next = page_info
            .get("has_next_page")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let cursor = page_info
            .get("end_cursor")
            .or_else(|| page_info.get("maxId"))
            .map(value_to_string)
            .filter(|c| !c.is_empty());
        return (has_next, cursor);
    }

    // Alternate pagination fields seen on older response formats. A cursor
    // with no explicit flag still means another page exists.
    let cursor = result
        .get("next_max_id")
        .or_else(|| result.get("maxId"))
        .map(value_to_string)
        .filter(|c| !c.is_empty());
    let has_next = result
        .get("has_more")
        .and_then(Value::as_bool)
        .unwrap_or_else(|| cursor.is_some());

    (has_next, cursor)
}

/// Cursor/id fields arrive as strings or numbers depending on the format.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_edge_node_shape() {
        let body = json!({
            "result": {
                "id": 12345,
                "edges": [
                    {"node": {"pk": "1"}},
                    {"node": {"pk": "2"}}
                ],
                "page_info": {"has_next_page": true, "end_cursor": "abc"}
            }
        });
        let page = parse_page(&body).unwrap();
        assert_eq!(page.nodes.len(), 2);
        assert!(page.has_next_page);
        assert_eq!(page.end_cursor.as_deref(), Some("abc"));
        assert_eq!(page.user_id.as_deref(), Some("12345"));
    }

    #[test]
    fn parses_direct_list_shape() {
        let body = json!({
            "result": {
                "posts": [{"pk": "1"}, {"pk": "2"}],
                "has_more": true,
                "next_max_id": "cursor-2"
            }
        });
        let page = parse_page(&body).unwrap();
        assert_eq!(page.nodes.len(), 2);
        assert_eq!(page.nodes[0]["pk"], "1");
        assert!(page.has_next_page);
        assert_eq!(page.end_cursor.as_deref(), Some("cursor-2"));
    }

    #[test]
    fn bare_cursor_implies_next_page() {
        let body = json!({
            "result": {
                "reels": [{"pk": "9"}],
                "maxId": "cursor-9"
            }
        });
        let page = parse_page(&body).unwrap();
        assert!(page.has_next_page);
        assert_eq!(page.end_cursor.as_deref(), Some("cursor-9"));
    }

    #[test]
    fn parses_bare_list_result() {
        let body = json!({"result": [{"pk": "1"}]});
        let page = parse_page(&body).unwrap();
        assert_eq!(page.nodes.len(), 1);
        assert!(!page.has_next_page);
        assert!(page.end_cursor.is_none());
    }

    #[test]
    fn shapes_yield_identical_nodes() {
        let edge_shape = json!({
            "result": {"edges": [{"node": {"pk": "7", "like_count": 3}}]}
        });
        let list_shape = json!({
            "result": {"posts": [{"pk": "7", "like_count": 3}]}
        });
        let a = parse_page(&edge_shape).unwrap();
        let b = parse_page(&list_shape).unwrap();
        assert_eq!(a.nodes, b.nodes);
    }

    #[test]
    fn missing_envelope_is_invalid() {
        let body = json!({"status": "ok"});
        assert!(matches!(
            parse_page(&body),
            Err(CoreError::InstagramApi(
                InstagramApiError::InvalidResponse { .. }
            ))
        ));
    }

    #[test]
    fn empty_result_ends_pagination() {
        let body = json!({"result": {"edges": []}});
        let page = parse_page(&body).unwrap();
        assert!(page.nodes.is_empty());
        assert!(!page.has_next_page);
    }
}
