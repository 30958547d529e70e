use anyhow::Result;
use inquire::{Confirm, Editor, Select, Text};
use std::path::PathBuf;

use reqtrack_core::{
    NewRequirement, Requirement, RequirementCategory, RequirementPriority, RequirementType,
};

const NO_CATEGORY: &str = "(none)";

fn prompt_category(
    categories: &[RequirementCategory],
    current: Option<uuid::Uuid>,
) -> Result<Option<uuid::Uuid>> {
    if categories.is_empty() {
        return Ok(None);
    }
    let mut options = vec![NO_CATEGORY.to_string()];
    options.extend(categories.iter().map(|c| c.name.clone()));
    let cursor = current
        .and_then(|id| categories.iter().position(|c| c.id == id))
        .map(|i| i + 1)
        .unwrap_or(0);

    let choice = Select::new("Category:", options)
        .with_starting_cursor(cursor)
        .prompt()?;
    Ok(categories
        .iter()
        .find(|c| c.name == choice)
        .map(|c| c.id))
}

fn position_of<T: PartialEq>(options: &[T], value: &T) -> usize {
    options.iter().position(|o| o == value).unwrap_or(0)
}

/// Prompts the user for a new requirement
pub fn prompt_new_requirement(categories: &[RequirementCategory]) -> Result<NewRequirement> {
    let title = Text::new("Title:").prompt()?;

    // Use the Editor type for multiline input
    let description = Editor::new("Description:").prompt()?;
    let mut draft = NewRequirement::new(title, description);

    draft.acceptance_criteria = Editor::new("Acceptance criteria:").prompt()?;
    draft.req_type = Select::new("Type:", RequirementType::ALL.to_vec()).prompt()?;
    draft.priority = Select::new("Priority:", RequirementPriority::ALL.to_vec())
        .with_starting_cursor(1)
        .prompt()?;
    draft.category_id = prompt_category(categories, None)?;

    Ok(draft)
}

/// Prompts for every editable field, prefilled with the current values
pub fn prompt_edit_requirement(
    mut req: Requirement,
    categories: &[RequirementCategory],
) -> Result<Requirement> {
    req.title = Text::new("Title:").with_default(&req.title).prompt()?;
    req.description = Editor::new("Description:")
        .with_predefined_text(&req.description)
        .prompt()?;
    req.acceptance_criteria = Editor::new("Acceptance criteria:")
        .with_predefined_text(&req.acceptance_criteria)
        .prompt()?;

    let types = RequirementType::ALL.to_vec();
    let type_cursor = position_of(&types, &req.req_type);
    req.req_type = Select::new("Type:", types)
        .with_starting_cursor(type_cursor)
        .prompt()?;

    let priorities = RequirementPriority::ALL.to_vec();
    let priority_cursor = position_of(&priorities, &req.priority);
    req.priority = Select::new("Priority:", priorities)
        .with_starting_cursor(priority_cursor)
        .prompt()?;

    req.category_id = prompt_category(categories, req.category_id)?;
    Ok(req)
}

/// Prompts the user for database registration details
pub fn prompt_register_database() -> Result<(String, PathBuf, String, bool)> {
    let name = Text::new("Database name:").prompt()?;
    let path = Text::new("Database path:")
        .with_default(&format!("{}.db", name))
        .prompt()?;
    let description = Text::new("Description:").with_default("").prompt()?;
    let set_default = Confirm::new("Set as default database?")
        .with_default(false)
        .prompt()?;

    Ok((name, PathBuf::from(path), description, set_default))
}

/// Asks before a destructive operation
pub fn confirm(message: &str) -> Result<bool> {
    Ok(Confirm::new(message).with_default(false).prompt()?)
}
