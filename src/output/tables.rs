use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::snapshot::StepState;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn state_cell(state: &StepState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        StepState::Successful => cell.fg(TableColor::Green),
        StepState::Failed | StepState::Error => cell.fg(TableColor::Red),
        StepState::InProgress => cell.fg(TableColor::Yellow),
        StepState::Other(_) => cell.fg(TableColor::DarkGrey),
    }
}
