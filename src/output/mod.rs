mod styling;
mod tables;

use comfy_table::Cell;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::providers::pipeline_url;
use crate::snapshot::Snapshot;

pub use styling::{bright_red, cyan, dim};

pub fn print_banner() {
    eprintln!("{}", cyan("pipewatch - Bitbucket Pipelines branch status"));
}

/// Renders a snapshot as a branch/step table.
///
/// Branches appear most recently built first, steps alphabetically within
/// their branch, matching how the aggregate reads best at a glance. The
/// branch column is only filled on the first row of each branch group.
pub fn render_snapshot(snapshot: &Snapshot, workspace: &str, repository: &str) -> String {
    if snapshot.is_empty() {
        return format!("{}", dim("No branch activity in the covered window"));
    }

    let mut table = tables::create_table();
    table.set_header(vec!["Branch", "Last run", "Step", "State", "Origin"]);

    for branch in snapshot.branches_by_recency() {
        let mut steps: Vec<_> = branch.steps.values().collect();
        steps.sort_by(|a, b| a.name.cmp(&b.name));

        let branch_cells = (
            Cell::new(&branch.name),
            Cell::new(format!("#{}", branch.last_pipeline_number)),
        );

        if steps.is_empty() {
            let (name, last) = branch_cells;
            table.add_row(vec![name, last, Cell::new(""), Cell::new(""), Cell::new("")]);
            continue;
        }

        let mut branch_cells = Some(branch_cells);
        for step in steps {
            let (name, last) = branch_cells
                .take()
                .unwrap_or((Cell::new(""), Cell::new("")));

            table.add_row(vec![
                name,
                last,
                Cell::new(&step.name),
                tables::state_cell(&step.state),
                Cell::new(format!("#{}", step.origin_pipeline)),
            ]);
        }
    }

    let footer = dim(format!(
        "Collected at {} from {}",
        snapshot.collected_at.format("%Y-%m-%d %H:%M:%S UTC"),
        pipeline_url(
            workspace,
            repository,
            snapshot
                .branches_by_recency()
                .first()
                .map_or(0, |branch| branch.last_pipeline_number)
        ),
    ));

    format!("{table}\n{footer}")
}

/// Spinner shown while a foreground refresh cycle runs.
pub fn refresh_spinner(window: usize) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(format!("Refreshing {window} recent pipelines..."));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
