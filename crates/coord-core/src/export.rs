//! The Network Materializer (§4.5): turns a computed network's edges into
//! GraphML (§6.2) or edge-list CSV (§6.3).

use std::collections::BTreeMap;
use std::io::Write;

use snafu::{ResultExt, Snafu};
use tracing::instrument;

use crate::model::{NetworkEdge, NetworkKind, UserId, Username};
use crate::store::{DbError, Store};

const LOG_TARGET: &str = "coord::export";

#[derive(Debug, Snafu)]
pub enum ExportError {
    #[snafu(transparent)]
    Store { source: DbError },
    Io {
        source: std::io::Error,
        #[snafu(implicit)]
        location: snafu::Location,
    },
    #[snafu(transparent)]
    Csv { source: csv::Error },
}

pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    GraphMl,
    Csv,
}

/// Options for one `export_network` invocation (§4.5).
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub min_weight: u64,
    pub n_messages: usize,
    pub include_self_loops: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { min_weight: 1, n_messages: 10, include_self_loops: false }
    }
}

impl Store {
    /// Streams `kind`'s network to `out` in `format`, filtered by
    /// `options`. Nodes are the distinct users touched by a retained edge;
    /// each carries its latest-N message snapshot.
    #[instrument(skip(self, out))]
    pub fn export_network(
        &self,
        kind: NetworkKind,
        format: OutputFormat,
        options: &ExportOptions,
        out: &mut impl Write,
    ) -> ExportResult<()> {
        let mut edges = self.read_network(kind)?;
        edges.retain(|e| e.weight >= options.min_weight);
        if !options.include_self_loops {
            edges.retain(|e| e.user_a != e.user_b);
        }

        let mut users: Vec<UserId> = edges
            .iter()
            .flat_map(|e| [e.user_a.clone(), e.user_b.clone()])
            .collect();
        users.sort();
        users.dedup();

        let snapshots = self.latest_messages_per_user(options.n_messages)?;
        let snapshot_by_user: BTreeMap<UserId, (Username, Vec<String>)> = snapshots
            .into_iter()
            .map(|(user_id, username, messages)| {
                (user_id, (username, messages.into_iter().map(|m| m.message).collect()))
            })
            .collect();

        tracing::debug!(
            target: LOG_TARGET,
            network = kind.table_name(),
            nodes = users.len(),
            edges = edges.len(),
            "exporting network"
        );

        match format {
            OutputFormat::GraphMl => write_graphml(out, kind, &users, &edges, &snapshot_by_user, options),
            OutputFormat::Csv => write_csv(out, kind, &edges),
        }
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// A small internal streaming writer (§6.2): no crate in this lineage
/// already serializes XML, and the GraphML schema here is small and fixed.
fn write_graphml(
    out: &mut impl Write,
    kind: NetworkKind,
    users: &[UserId],
    edges: &[NetworkEdge],
    snapshots: &BTreeMap<UserId, (Username, Vec<String>)>,
    options: &ExportOptions,
) -> ExportResult<()> {
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).context(IoSnafu)?;
    writeln!(
        out,
        r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns">"#
    )
    .context(IoSnafu)?;

    writeln!(out, r#"<key id="user_id" for="node" attr.name="user_id" attr.type="string"/>"#)
        .context(IoSnafu)?;
    writeln!(out, r#"<key id="username" for="node" attr.name="username" attr.type="string"/>"#)
        .context(IoSnafu)?;
    for i in 1..=options.n_messages {
        writeln!(
            out,
            r#"<key id="message_{i}" for="node" attr.name="message_{i}" attr.type="string"/>"#
        )
        .context(IoSnafu)?;
    }
    writeln!(out, r#"<key id="edge_type" for="edge" attr.name="edge_type" attr.type="string"/>"#)
        .context(IoSnafu)?;
    writeln!(out, r#"<key id="weight" for="edge" attr.name="weight" attr.type="int"/>"#)
        .context(IoSnafu)?;

    writeln!(out, r#"<graph edgedefault="directed">"#).context(IoSnafu)?;

    for user in users {
        let escaped_id = xml_escape(user.as_str());
        writeln!(out, r#"<node id="{escaped_id}">"#).context(IoSnafu)?;
        writeln!(
            out,
            r#"<data key="user_id">{}</data>"#,
            xml_escape(user.as_str())
        )
        .context(IoSnafu)?;
        if let Some((username, messages)) = snapshots.get(user) {
            writeln!(out, r#"<data key="username">{}</data>"#, xml_escape(username.as_str()))
                .context(IoSnafu)?;
            for (i, message) in messages.iter().enumerate() {
                writeln!(
                    out,
                    r#"<data key="message_{}">{}</data>"#,
                    i + 1,
                    xml_escape(message)
                )
                .context(IoSnafu)?;
            }
        }
        writeln!(out, "</node>").context(IoSnafu)?;
    }

    for edge in edges {
        writeln!(
            out,
            r#"<edge source="{}" target="{}">"#,
            xml_escape(edge.user_a.as_str()),
            xml_escape(edge.user_b.as_str())
        )
        .context(IoSnafu)?;
        writeln!(out, r#"<data key="edge_type">{}</data>"#, kind.table_name()).context(IoSnafu)?;
        writeln!(out, r#"<data key="weight">{}</data>"#, edge.weight).context(IoSnafu)?;
        writeln!(out, "</edge>").context(IoSnafu)?;
    }

    writeln!(out, "</graph>").context(IoSnafu)?;
    writeln!(out, "</graphml>").context(IoSnafu)?;
    Ok(())
}

fn write_csv(out: &mut impl Write, kind: NetworkKind, edges: &[NetworkEdge]) -> ExportResult<()> {
    let mut writer = csv::WriterBuilder::new().from_writer(out);
    writer.write_record(["user_a", "user_b", "edge_type", "weight"])?;
    for edge in edges {
        writer.write_record([
            edge.user_a.as_str(),
            edge.user_b.as_str(),
            kind.table_name(),
            &edge.weight.to_string(),
        ])?;
    }
    writer.flush().context(IoSnafu)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NormalizedRow;

    fn seed(store: &Store) {
        store
            .insert_messages(vec![
                NormalizedRow {
                    message_id: "a".into(),
                    user_id: "alice".into(),
                    username: "alice_h".into(),
                    repost_id: None,
                    reply_id: None,
                    message: "hello world".into(),
                    timestamp: 0.0,
                    urls: vec![],
                },
                NormalizedRow {
                    message_id: "b".into(),
                    user_id: "bob".into(),
                    username: "bob_h".into(),
                    repost_id: None,
                    reply_id: None,
                    message: "hello world".into(),
                    timestamp: 1.0,
                    urls: vec![],
                },
            ])
            .unwrap();
    }

    #[test]
    fn graphml_contains_nodes_and_edges() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        store
            .write_network(
                NetworkKind::CoTweet,
                vec![
                    NetworkEdge { user_a: "alice".into(), user_b: "bob".into(), weight: 3 },
                    NetworkEdge { user_a: "bob".into(), user_b: "alice".into(), weight: 3 },
                ],
                1,
            )
            .unwrap();

        let mut buf = vec![];
        store
            .export_network(
                NetworkKind::CoTweet,
                OutputFormat::GraphMl,
                &ExportOptions::default(),
                &mut buf,
            )
            .unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.contains(r#"<node id="alice">"#));
        assert!(xml.contains(r#"source="alice" target="bob""#));
        assert!(xml.contains("hello world"));
    }

    #[test]
    fn csv_export_has_header_and_rows() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        store
            .write_network(
                NetworkKind::CoTweet,
                vec![NetworkEdge { user_a: "alice".into(), user_b: "bob".into(), weight: 2 }],
                1,
            )
            .unwrap();

        let mut buf = vec![];
        store
            .export_network(NetworkKind::CoTweet, OutputFormat::Csv, &ExportOptions::default(), &mut buf)
            .unwrap();
        let csv_text = String::from_utf8(buf).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next().unwrap(), "user_a,user_b,edge_type,weight");
        assert_eq!(lines.next().unwrap(), "alice,bob,co_tweet,2");
    }

    #[test]
    fn self_loops_excluded_by_default() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        store
            .write_network(
                NetworkKind::CoTweet,
                vec![NetworkEdge { user_a: "alice".into(), user_b: "alice".into(), weight: 2 }],
                1,
            )
            .unwrap();

        let mut buf = vec![];
        store
            .export_network(NetworkKind::CoTweet, OutputFormat::Csv, &ExportOptions::default(), &mut buf)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 1);
    }
}
