use sequencer_core::{Entity, SequenceRootContainer, StatusEvent};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

// ---------------------------------------------------------------------------
// Sequence trees
// ---------------------------------------------------------------------------

/// One entity of a tree listing.
#[derive(Debug, Serialize)]
pub struct TreeRow {
    pub depth: usize,
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(rename = "type")]
    pub discriminator: String,
    pub status: String,
}

/// Every entity of `root` in walk order.
pub fn tree(root: &SequenceRootContainer) -> Vec<TreeRow> {
    let mut rows = Vec::new();
    root.walk(&mut |entity, depth| {
        rows.push(TreeRow {
            depth,
            id: entity.id().to_string(),
            name: entity.name().to_string(),
            kind: entity.kind().to_string(),
            discriminator: entity.discriminator().to_string(),
            status: entity.status().to_string(),
        });
    });
    rows
}

pub fn print_tree(rows: &[TreeRow]) {
    let cells = rows
        .iter()
        .map(|row| {
            vec![
                format!("{}{}", "  ".repeat(row.depth), row.name),
                row.kind.clone(),
                row.discriminator.clone(),
                row.status.clone(),
                row.id.chars().take(8).collect(),
            ]
        })
        .collect();
    print_table(&["NAME", "KIND", "TYPE", "STATUS", "ID"], cells);
}

/// One line per status transition, as printed during `sequencer run`.
pub fn event_line(event: &StatusEvent) -> String {
    format!(
        "{}  {:<9} -> {:<9} {} {}",
        event
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S%.3f"),
        event.from.as_str(),
        event.to.as_str(),
        event.kind,
        event.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequencer_core::nodes::instructions::Wait;
    use sequencer_core::{InstructionNode, SequenceContainer};

    #[test]
    fn tree_lists_entities_with_depth() {
        let mut root = SequenceRootContainer::new("night");
        root.add(SequenceContainer::sequential("block").with(InstructionNode::new(Wait::new(1.0))))
            .unwrap();

        let rows = tree(&root);
        let listed: Vec<(usize, &str, &str)> = rows
            .iter()
            .map(|r| (r.depth, r.name.as_str(), r.discriminator.as_str()))
            .collect();
        assert_eq!(
            listed,
            [
                (0, "night", "container.sequential"),
                (1, "block", "container.sequential"),
                (2, "instruction.wait", "instruction.wait"),
            ]
        );
        assert!(rows.iter().all(|r| r.status == "created"));
    }
}
