mod cli;
mod prompts;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use colored::{ColoredString, Colorize};
use log::debug;
use std::path::{Path, PathBuf};

use reqtrack_core::db::{export_backend_to_json, import_json_to_backend};
use reqtrack_core::export::csv_filename;
use reqtrack_core::{
    create_backend, determine_database_path, get_registry_path, migrate_sqlite_to_yaml,
    migrate_yaml_to_sqlite, open_or_create, BackendType, MemberRole, NewRequirement, Project, Registry,
    Requirement, RequirementFilter, RequirementPriority, RequirementStatus, RequirementType,
};

use crate::cli::{
    CategoryCommand, Cli, Command, DbCommand, ExportCommand, ObjectiveCommand, OrgCommand,
    ProjectCommand, ReqCommand, UserCommand,
};
use crate::session::Session;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("{}", error_line(&err));
        std::process::exit(1);
    }
}

/// The red line printed for a failed command, with its context chain
fn error_line(err: &anyhow::Error) -> String {
    format!("{} {:#}", "Error:".red().bold(), err)
}

fn run(cli: &Cli) -> Result<()> {
    if let Command::Db(cmd) = &cli.command {
        return handle_db_command(cmd, cli);
    }

    let session = open_session(cli, &database_path(cli)?)?;
    match &cli.command {
        Command::User(cmd) => handle_user_command(cmd, &session),
        Command::Org(cmd) => handle_org_command(cmd, &session),
        Command::Project(cmd) => handle_project_command(cmd, &session),
        Command::Category(cmd) => handle_category_command(cmd, &session),
        Command::Objective(cmd) => handle_objective_command(cmd, &session),
        Command::Req(cmd) => handle_req_command(cmd, &session),
        Command::Export(cmd) => handle_export_command(cmd, &session),
        Command::Dashboard => show_dashboard(&session),
        Command::Matrix => show_matrix(&session),
        Command::Db(_) => Ok(()),
    }
}

fn database_path(cli: &Cli) -> Result<PathBuf> {
    let path = determine_database_path(cli.db.as_deref(), cli.project_db.as_deref())?;
    debug!("Using database {:?}", path);
    Ok(path)
}

fn open_session(cli: &Cli, path: &Path) -> Result<Session> {
    let backend =
        open_or_create(path, None).with_context(|| format!("Failed to open database {:?}", path))?;
    debug!(
        "Opened {} backend as user {:?}, project {:?}",
        backend.backend_type(),
        cli.user,
        cli.project
    );
    Ok(Session::new(backend, cli.user.clone(), cli.project.clone()))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn colored_status(status: RequirementStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        RequirementStatus::Draft => label.yellow(),
        RequirementStatus::InReview => label.cyan(),
        RequirementStatus::Approved => label.blue(),
        RequirementStatus::Rejected => label.red(),
        RequirementStatus::Implemented => label.magenta(),
        RequirementStatus::Verified => label.green(),
    }
}

fn colored_priority(priority: RequirementPriority) -> ColoredString {
    let label = priority.as_str();
    match priority {
        RequirementPriority::High => label.red(),
        RequirementPriority::Medium => label.yellow(),
        RequirementPriority::Low => label.green(),
    }
}

fn confirmed(yes: bool, message: &str) -> Result<bool> {
    if yes || prompts::confirm(message)? {
        return Ok(true);
    }
    println!("{}", "Deletion cancelled.".yellow());
    Ok(false)
}

// =============================================================================
// Users
// =============================================================================

fn handle_user_command(cmd: &UserCommand, session: &Session) -> Result<()> {
    match cmd {
        UserCommand::Add { username, email } => {
            let user = session.backend.create_user(username, email)?;
            println!("{} User '{}' created.", "✓".green(), user.username);
            println!("UUID: {}", user.id);
        }
        UserCommand::List => {
            let users = session.backend.list_users()?;
            if users.is_empty() {
                println!("{}", "No users found.".yellow());
                return Ok(());
            }
            println!("{:<20} | {:<30} | {:<36}", "Username", "Email", "UUID");
            println!("{}", "-".repeat(92));
            for user in users {
                println!("{:<20} | {:<30} | {:<36}", user.username, user.email, user.id);
            }
        }
        UserCommand::Delete { username, yes } => {
            let user = session.user_by_name(username)?;
            if !confirmed(*yes, &format!("Delete user '{}'?", user.username))? {
                return Ok(());
            }
            session.backend.delete_user(&user.id)?;
            println!("{} User '{}' deleted.", "✓".green(), user.username);
        }
    }
    Ok(())
}

// =============================================================================
// Organizations
// =============================================================================

fn handle_org_command(cmd: &OrgCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    match cmd {
        OrgCommand::Create { name, description } => {
            let org = session
                .backend
                .create_organization(name, description, Some(user.id))?;
            println!("{} Organization '{}' created.", "✓".green(), org.name);
            println!("UUID: {}", org.id);
        }
        OrgCommand::List => {
            let orgs = session.backend.organizations_for_user(&user.id)?;
            if orgs.is_empty() {
                println!("{}", "No organizations found.".yellow());
                return Ok(());
            }
            println!("{:<30} | {:<8} | {:<36}", "Name", "Role", "UUID");
            println!("{}", "-".repeat(80));
            for org in orgs {
                let role = session
                    .role_in(&user, &org.id)?
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                println!("{:<30} | {:<8} | {:<36}", org.name, role, org.id);
            }
        }
        OrgCommand::Show { org } => {
            let org = session.resolve_org(org)?;
            session.ensure_view(&user, &org.id)?;

            println!("{}: {}", "Organization".blue(), org.name);
            println!("{}: {}", "UUID".blue(), org.id);
            if !org.description.is_empty() {
                println!("{}: {}", "Description".blue(), org.description);
            }
            println!("{}: {}", "Created".blue(), org.created_at);

            println!("\n{}:", "Members".green());
            for member in session.backend.members_of(&org.id)? {
                let name = session
                    .backend
                    .get_user(&member.user_id)?
                    .map(|u| u.username)
                    .unwrap_or_else(|| member.user_id.to_string());
                println!("  {:<20} {}", name, member.role.to_string().cyan());
            }

            println!("\n{}:", "Projects".green());
            let projects = session.backend.projects_in(&org.id)?;
            if projects.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for project in projects {
                println!("  {:<30} {}", project.name, project.id.to_string().dimmed());
            }
        }
        OrgCommand::AddMember {
            org,
            username,
            role,
        } => {
            let org = session.resolve_org(org)?;
            session.ensure_admin(&user, &org.id)?;
            let member = session.user_by_name(username)?;
            let role = role.parse::<MemberRole>()?;
            session.backend.add_member(&org.id, &member.id, role)?;
            println!(
                "{} Added '{}' to '{}' as {}.",
                "✓".green(),
                member.username,
                org.name,
                role
            );
        }
        OrgCommand::SetRole {
            org,
            username,
            role,
        } => {
            let org = session.resolve_org(org)?;
            session.ensure_admin(&user, &org.id)?;
            let member = session.user_by_name(username)?;
            let role = role.parse::<MemberRole>()?;
            session.backend.set_member_role(&org.id, &member.id, role)?;
            println!("{} '{}' is now {} of '{}'.", "✓".green(), member.username, role, org.name);
        }
        OrgCommand::RemoveMember { org, username } => {
            let org = session.resolve_org(org)?;
            session.ensure_admin(&user, &org.id)?;
            let member = session.user_by_name(username)?;
            session.backend.remove_member(&org.id, &member.id)?;
            println!("{} Removed '{}' from '{}'.", "✓".green(), member.username, org.name);
        }
        OrgCommand::Delete { org, yes } => {
            let org = session.resolve_org(org)?;
            session.ensure_admin(&user, &org.id)?;
            let message = format!(
                "Delete organization '{}' with all of its projects and requirements?",
                org.name
            );
            if !confirmed(*yes, &message)? {
                return Ok(());
            }
            session.backend.delete_organization(&org.id)?;
            println!("{} Organization '{}' deleted.", "✓".green(), org.name);
        }
    }
    Ok(())
}

// =============================================================================
// Projects, categories and objectives
// =============================================================================

fn print_project_row(project: &Project, org_name: &str) {
    println!(
        "{:<25} | {:<20} | {:<20} | {:<36}",
        project.name,
        org_name,
        project.updated_at.format("%Y-%m-%d %H:%M"),
        project.id
    );
}

fn handle_project_command(cmd: &ProjectCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    match cmd {
        ProjectCommand::Create {
            org,
            name,
            description,
        } => {
            let org = session.resolve_org(org)?;
            session.ensure_edit(&user, &org.id)?;
            let project = session
                .backend
                .create_project(&org.id, name, description, Some(user.id))?;
            println!("{} Project '{}' created in '{}'.", "✓".green(), project.name, org.name);
            println!("UUID: {}", project.id);
        }
        ProjectCommand::List { org } => {
            let orgs = match org {
                Some(key) => {
                    let org = session.resolve_org(key)?;
                    session.ensure_view(&user, &org.id)?;
                    vec![org]
                }
                None => session.backend.organizations_for_user(&user.id)?,
            };

            println!(
                "{:<25} | {:<20} | {:<20} | {:<36}",
                "Name", "Organization", "Updated", "UUID"
            );
            println!("{}", "-".repeat(110));
            let mut shown = 0;
            for org in &orgs {
                for project in session.backend.projects_in(&org.id)? {
                    print_project_row(&project, &org.name);
                    shown += 1;
                }
            }
            if shown == 0 {
                println!("{}", "No projects found.".yellow());
            }
        }
        ProjectCommand::Show => {
            let project = session.project(&user)?;
            println!("{}: {}", "Project".blue(), project.name);
            println!("{}: {}", "UUID".blue(), project.id);
            if !project.description.is_empty() {
                println!("{}: {}", "Description".blue(), project.description);
            }
            println!("{}: {}", "Created".blue(), project.created_at);
            println!("{}: {}", "Updated".blue(), project.updated_at);

            println!("\n{}:", "Requirements by status".green());
            let counts = session.backend.status_counts(&project.id)?;
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            for (status, count) in counts {
                println!("  {:<12} {}", colored_status(status), count);
            }
            println!("  {:<12} {}", "Total".bold(), total);
        }
        ProjectCommand::Delete { yes } => {
            let project = session.project(&user)?;
            let owns = project.created_by == Some(user.id);
            if !owns {
                session.ensure_admin(&user, &project.organization_id)?;
            }
            let message = format!(
                "Delete project '{}' with all of its requirements?",
                project.name
            );
            if !confirmed(*yes, &message)? {
                return Ok(());
            }
            session.backend.delete_project(&project.id)?;
            println!("{} Project '{}' deleted.", "✓".green(), project.name);
        }
    }
    Ok(())
}

fn handle_category_command(cmd: &CategoryCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    let project = session.project(&user)?;
    match cmd {
        CategoryCommand::Add { name, description } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let category = session.backend.add_category(&project.id, name, description)?;
            println!("{} Category '{}' added.", "✓".green(), category.name);
        }
        CategoryCommand::List => {
            let categories = session.backend.categories(&project.id)?;
            if categories.is_empty() {
                println!("{}", "(No categories defined yet)".dimmed());
                return Ok(());
            }
            println!("{:<25} | {:<40}", "Name", "Description");
            println!("{}", "-".repeat(68));
            for category in categories {
                println!("{:<25} | {:<40}", category.name, category.description);
            }
        }
        CategoryCommand::Delete { category } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let category = session.resolve_category(&project, category)?;
            session.backend.delete_category(&category.id)?;
            println!("{} Category '{}' deleted.", "✓".green(), category.name);
        }
    }
    Ok(())
}

fn handle_objective_command(cmd: &ObjectiveCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    let project = session.project(&user)?;
    match cmd {
        ObjectiveCommand::Add { title, description } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let objective =
                session
                    .backend
                    .add_objective(&project.id, title, description, Some(user.id))?;
            println!("{} Objective '{}' added.", "✓".green(), objective.title);
        }
        ObjectiveCommand::List => {
            let objectives = session.backend.objectives(&project.id)?;
            if objectives.is_empty() {
                println!("{}", "(No objectives defined yet)".dimmed());
                return Ok(());
            }
            for objective in objectives {
                println!("{} {}", "•".blue(), objective.title.bold());
                if !objective.description.is_empty() {
                    println!("  {}", objective.description);
                }
            }
        }
        ObjectiveCommand::Delete { objective } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let objective = session.resolve_objective(&project, objective)?;
            session.backend.delete_objective(&objective.id)?;
            println!("{} Objective '{}' deleted.", "✓".green(), objective.title);
        }
        ObjectiveCommand::Link { req, objective } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let req = session.resolve_requirement(&project, req)?;
            let objective = session.resolve_objective(&project, objective)?;
            if session.backend.link_objective(&req.id, &objective.id)? {
                println!("{} {} now traces to '{}'.", "✓".green(), req.identifier, objective.title);
            } else {
                println!("{} already traces to '{}'.", req.identifier, objective.title);
            }
        }
        ObjectiveCommand::Unlink { req, objective } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let req = session.resolve_requirement(&project, req)?;
            let objective = session.resolve_objective(&project, objective)?;
            if session.backend.unlink_objective(&req.id, &objective.id)? {
                println!("{} Link removed.", "✓".green());
            } else {
                println!("{} No such link.", "!".yellow());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Requirements
// =============================================================================

fn handle_req_command(cmd: &ReqCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    let project = session.project(&user)?;
    match cmd {
        ReqCommand::Add {
            title,
            description,
            acceptance,
            r#type,
            priority,
            status,
            category,
            parent,
            id,
            interactive,
        } => {
            session.ensure_edit(&user, &project.organization_id)?;

            let should_be_interactive = *interactive || title.is_none();
            let mut draft = if should_be_interactive {
                prompts::prompt_new_requirement(&session.backend.categories(&project.id)?)?
            } else {
                let mut draft = NewRequirement::new(
                    title.clone().unwrap_or_default(),
                    description.clone().unwrap_or_default(),
                );
                draft.acceptance_criteria = acceptance.clone().unwrap_or_default();
                if let Some(t) = r#type {
                    draft.req_type = t.parse::<RequirementType>()?;
                }
                if let Some(p) = priority {
                    draft.priority = p.parse::<RequirementPriority>()?;
                }
                if let Some(c) = category {
                    draft.category_id = Some(session.resolve_category(&project, c)?.id);
                }
                draft
            };
            if let Some(s) = status {
                draft.status = s.parse::<RequirementStatus>()?;
            }
            if let Some(p) = parent {
                draft.parent_id = Some(session.resolve_requirement(&project, p)?.id);
            }
            draft.identifier = id.clone();

            let req = session
                .backend
                .create_requirement(&project.id, draft, Some(user.id))?;
            println!("{}", "Requirement added successfully!".green());
            println!("UUID: {}", req.id);
            println!("ID: {}", req.identifier.green());
        }
        ReqCommand::List {
            title,
            status,
            priority,
            r#type,
            category,
        } => {
            let mut filter = RequirementFilter::new();
            if let Some(t) = title {
                filter = filter.with_title(t.clone());
            }
            if let Some(s) = status {
                filter = filter.with_status(s.parse()?);
            }
            if let Some(p) = priority {
                filter = filter.with_priority(p.parse()?);
            }
            if let Some(t) = r#type {
                filter = filter.with_type(t.parse()?);
            }
            if let Some(c) = category {
                filter = filter.with_category(session.resolve_category(&project, c)?.id);
            }
            list_requirements(session, &project, &filter)?;
        }
        ReqCommand::Show { req } => {
            let req = session.resolve_requirement(&project, req)?;
            show_requirement(session, &req)?;
        }
        ReqCommand::Edit {
            req,
            title,
            description,
            acceptance,
            r#type,
            priority,
            category,
        } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let mut req = session.resolve_requirement(&project, req)?;

            let no_fields = title.is_none()
                && description.is_none()
                && acceptance.is_none()
                && r#type.is_none()
                && priority.is_none()
                && category.is_none();
            if no_fields {
                println!("Editing requirement: {} {}", req.identifier, req.title);
                req = prompts::prompt_edit_requirement(
                    req,
                    &session.backend.categories(&project.id)?,
                )?;
            } else {
                if let Some(t) = title {
                    req.title = t.clone();
                }
                if let Some(d) = description {
                    req.description = d.clone();
                }
                if let Some(a) = acceptance {
                    req.acceptance_criteria = a.clone();
                }
                if let Some(t) = r#type {
                    req.req_type = t.parse()?;
                }
                if let Some(p) = priority {
                    req.priority = p.parse()?;
                }
                if let Some(c) = category {
                    req.category_id = if c.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(session.resolve_category(&project, c)?.id)
                    };
                }
            }

            session.backend.update_requirement(req, Some(user.id))?;
            println!("{}", "Requirement updated successfully!".green());
        }
        ReqCommand::Status { req, status } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let req = session.resolve_requirement(&project, req)?;
            let update = session
                .backend
                .update_status(&req.id, status, Some(user.id))?;
            match update.entry {
                Some(entry) => println!("{} {}: {}", "✓".green(), req.identifier, entry.notes),
                None => println!(
                    "{} {} is already {}.",
                    "!".yellow(),
                    req.identifier,
                    colored_status(update.requirement.status)
                ),
            }
        }
        ReqCommand::History { req } => {
            let req = session.resolve_requirement(&project, req)?;
            println!("{} {}", req.identifier.bold(), req.title);
            print_history(session, &session.backend.requirement_history(&req.id)?)?;
        }
        ReqCommand::Delete { req, yes } => {
            let req = session.resolve_requirement(&project, req)?;
            reqtrack_core::access::ensure(
                session.can_delete(&user, &req)?,
                "only the author, the project creator or an organization admin may delete a requirement",
            )?;

            println!("{}", "Requirement to delete:".yellow());
            println!("  ID: {}", req.identifier);
            println!("  Title: {}", req.title);
            if !confirmed(*yes, "Are you sure you want to delete this requirement?")? {
                return Ok(());
            }
            session.backend.delete_requirement(&req.id)?;
            println!("{}", "Requirement deleted successfully!".green());
        }
        ReqCommand::Relate { req, other, remove } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let from = session.resolve_requirement(&project, req)?;
            let to = session.resolve_requirement(&project, other)?;
            let changed = if *remove {
                session.backend.remove_related(&from.id, &to.id)?
            } else {
                session.backend.add_related(&from.id, &to.id)?
            };
            if changed {
                println!("{} Updated relations of {}.", "✓".green(), from.identifier);
            } else {
                println!("{} Nothing to change.", "!".yellow());
            }
        }
        ReqCommand::Parent { req, parent } => {
            session.ensure_edit(&user, &project.organization_id)?;
            let child = session.resolve_requirement(&project, req)?;
            let parent = match parent {
                Some(key) => Some(session.resolve_requirement(&project, key)?),
                None => None,
            };
            session
                .backend
                .set_parent(&child.id, parent.as_ref().map(|p| p.id))?;
            match parent {
                Some(p) => println!("{} {} is now a child of {}.", "✓".green(), child.identifier, p.identifier),
                None => println!("{} {} has no parent.", "✓".green(), child.identifier),
            }
        }
    }
    Ok(())
}

fn list_requirements(session: &Session, project: &Project, filter: &RequirementFilter) -> Result<()> {
    let requirements = session.backend.list_requirements(&project.id, filter)?;
    if requirements.is_empty() {
        println!("{}", "No requirements found.".yellow());
        return Ok(());
    }

    println!(
        "{:<10} | {:<40} | {:<12} | {:<8} | {:<15}",
        "ID", "Title", "Status", "Priority", "Type"
    );
    println!("{}", "-".repeat(100));
    for req in requirements {
        let title: String = req.title.chars().take(40).collect();
        println!(
            "{:<10} | {:<40} | {:<12} | {:<8} | {:<15}",
            req.identifier,
            title,
            colored_status(req.status),
            colored_priority(req.priority),
            req.req_type
        );
    }
    Ok(())
}

fn username_of(session: &Session, id: Option<uuid::Uuid>) -> Result<String> {
    let Some(id) = id else {
        return Ok("(unknown)".to_string());
    };
    Ok(session
        .backend
        .get_user(&id)?
        .map(|u| u.username)
        .unwrap_or_else(|| id.to_string()))
}

fn print_history(session: &Session, history: &[reqtrack_core::HistoryEntry]) -> Result<()> {
    for entry in history {
        println!(
            "  {} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            colored_status(entry.status),
            entry.notes
        );
        println!(
            "    {} {}",
            "By:".dimmed(),
            username_of(session, entry.changed_by)?.cyan()
        );
    }
    Ok(())
}

fn show_requirement(session: &Session, req: &Requirement) -> Result<()> {
    let detail = session.backend.requirement_detail(&req.id)?;
    let req = &detail.requirement;

    println!("{}: {}", "ID".blue(), req.identifier);
    println!("{}: {}", "UUID".blue(), req.id);
    println!("{}: {}", "Title".blue(), req.title);
    println!("{}: {}", "Description".blue(), req.description);
    if !req.acceptance_criteria.is_empty() {
        println!("{}: {}", "Acceptance".blue(), req.acceptance_criteria);
    }
    println!("{}: {}", "Status".blue(), colored_status(req.status));
    println!("{}: {}", "Priority".blue(), colored_priority(req.priority));
    println!("{}: {}", "Type".blue(), req.req_type);
    if let Some(category) = &detail.category {
        println!("{}: {}", "Category".blue(), category.name);
    }
    println!("{}: {}", "Created".blue(), req.created_at);
    println!("{}: {}", "Created by".blue(), username_of(session, req.created_by)?);
    println!("{}: {}", "Updated".blue(), req.updated_at);
    if req.updated_by.is_some() {
        println!("{}: {}", "Updated by".blue(), username_of(session, req.updated_by)?);
    }

    if let Some(parent) = &detail.parent {
        println!("{}: {} {}", "Parent".blue(), parent.identifier, parent.title);
    }
    if !detail.children.is_empty() {
        println!("\n{}:", "Children".green());
        for child in &detail.children {
            println!("  {} {}", child.identifier, child.title);
        }
    }
    if !detail.related.is_empty() {
        println!("\n{}:", "Related".green());
        for related in &detail.related {
            println!("  {} {}", related.identifier, related.title);
        }
    }
    if !detail.objectives.is_empty() {
        println!("\n{}:", "Objectives".green());
        for objective in &detail.objectives {
            println!("  {}", objective.title);
        }
    }

    println!("\n{}:", "History".green());
    print_history(session, &detail.history)
}

// =============================================================================
// Reports and exports
// =============================================================================

fn show_dashboard(session: &Session) -> Result<()> {
    let user = session.current_user()?;
    let dashboard = session.backend.dashboard(&user.id)?;

    println!("{}", "Organizations:".blue().bold());
    if dashboard.organizations.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for org in &dashboard.organizations {
        println!("  {}", org.name);
    }

    println!("\n{}", "Recently updated projects:".blue().bold());
    if dashboard.recent_projects.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for project in &dashboard.recent_projects {
        println!(
            "  {:<30} {}",
            project.name,
            project.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    Ok(())
}

fn show_matrix(session: &Session) -> Result<()> {
    let user = session.current_user()?;
    let project = session.project(&user)?;
    let matrix = session.backend.traceability_matrix(&project.id)?;

    println!("{} {}", "Traceability matrix:".blue().bold(), matrix.project.name);
    if matrix.objectives.is_empty() {
        println!("{}", "(No objectives defined yet)".dimmed());
    }
    for (i, objective) in matrix.objectives.iter().enumerate() {
        println!("  O{} = {}", i + 1, objective.title);
    }

    let header: Vec<String> = (1..=matrix.objectives.len())
        .map(|i| format!("{:^4}", format!("O{}", i)))
        .collect();
    for group in &matrix.groups {
        println!("\n{}", group.label.green());
        println!("  {:<10} {:<40} {}", "ID", "Title", header.join(""));
        for row in &group.rows {
            let marks: String = row
                .links
                .iter()
                .map(|linked| format!("{:^4}", if *linked { "x" } else { "." }))
                .collect();
            let title: String = row.requirement.title.chars().take(40).collect();
            println!("  {:<10} {:<40} {}", row.requirement.identifier, title, marks);
        }
    }

    let total: usize = matrix.groups.iter().map(|g| g.rows.len()).sum();
    println!(
        "\n{} of {} requirements trace to an objective.",
        matrix.covered_count(),
        total
    );
    Ok(())
}

fn handle_export_command(cmd: &ExportCommand, session: &Session) -> Result<()> {
    let user = session.current_user()?;
    match cmd {
        ExportCommand::Csv { output } => {
            let project = session.project(&user)?;
            let export = session.backend.export_csv(&project.id)?;
            let path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(csv_filename(&project.name)));
            export.save(&path)?;
            println!(
                "{} Exported {} requirements to {}",
                "✓".green(),
                export.body.lines().count().saturating_sub(1),
                path.display()
            );
        }
        ExportCommand::Json { output } => {
            export_backend_to_json(session.backend.as_ref(), output)?;
            println!("{} Exported database to {}", "✓".green(), output.display());
        }
    }
    Ok(())
}

// =============================================================================
// Database management
// =============================================================================

fn register_database(
    name: &Option<String>,
    path: &Option<PathBuf>,
    description: &Option<String>,
    default: bool,
    interactive: bool,
) -> Result<()> {
    let registry_path = get_registry_path()?;
    let mut registry = Registry::load_or_default(&registry_path)?;

    let should_be_interactive = interactive || (name.is_none() && path.is_none());
    let (db_name, db_path, db_description, is_default) = if should_be_interactive {
        prompts::prompt_register_database()?
    } else {
        let db_name = name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Database name is required"))?;
        let db_path = path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Database path is required"))?;
        (db_name, db_path, description.clone().unwrap_or_default(), default)
    };

    registry.register_database(&db_name, &db_path.to_string_lossy(), &db_description);
    if is_default {
        registry.set_default_database(&db_name)?;
    }
    registry.save(&registry_path)?;

    println!("{} Database '{}' registered successfully.", "✓".green(), db_name);
    if is_default {
        println!("{} Set as default database.", "✓".green());
    }
    Ok(())
}

fn handle_db_command(cmd: &DbCommand, cli: &Cli) -> Result<()> {
    if let DbCommand::Register {
        name,
        path,
        description,
        default,
        interactive,
    } = cmd
    {
        return register_database(name, path, description, *default, *interactive);
    }

    if let DbCommand::Unregister { name } = cmd {
        let registry_path = get_registry_path()?;
        let mut registry = Registry::load_or_default(&registry_path)?;
        registry.unregister_database(name)?;
        registry.save(&registry_path)?;
        println!("{} Database '{}' removed from the registry.", "✓".green(), name);
        return Ok(());
    }

    let database_path = &database_path(cli)?;
    if let DbCommand::Path = cmd {
        println!("{}", database_path.display());
        return Ok(());
    }

    let session = open_session(cli, database_path)?;
    match cmd {
        DbCommand::Register { .. } | DbCommand::Unregister { .. } | DbCommand::Path => {}
        DbCommand::Stats => {
            let stats = session.backend.stats()?;
            println!("{}: {}", "Database".blue(), database_path.display());
            println!("{}: {}", "Backend".blue(), stats.backend_type);
            println!("{}: {}", "Users".blue(), stats.user_count);
            println!("{}: {}", "Organizations".blue(), stats.organization_count);
            println!("{}: {}", "Projects".blue(), stats.project_count);
            println!("{}: {}", "Requirements".blue(), stats.requirement_count);
            println!("{}: {}", "History entries".blue(), stats.history_count);
        }
        DbCommand::Migrate { to } => {
            let source = session.backend.backend_type();
            let target = BackendType::from_path(to);
            let count = match (source, target) {
                (BackendType::Yaml, BackendType::Sqlite) => {
                    migrate_yaml_to_sqlite(database_path, to)?
                }
                (BackendType::Sqlite, BackendType::Yaml) => {
                    migrate_sqlite_to_yaml(database_path, to)?
                }
                _ => {
                    let store = session.backend.load()?;
                    create_backend(to, Some(target))?.save(&store)?;
                    store.requirements.len()
                }
            };
            println!(
                "{} Copied {} requirements from {} to {} ({})",
                "✓".green(),
                count,
                database_path.display(),
                to.display(),
                target
            );
        }
        DbCommand::Import { input, yes } => {
            let message = format!(
                "Replace everything in {} with {}?",
                database_path.display(),
                input.display()
            );
            if !yes && !prompts::confirm(&message)? {
                println!("{}", "Import cancelled.".yellow());
                return Ok(());
            }
            let count = import_json_to_backend(input, session.backend.as_ref())?;
            println!("{} Imported {} requirements.", "✓".green(), count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqtrack_core::TrackerError;

    #[test]
    fn test_invalid_status_error_line() {
        colored::control::set_override(false);
        let err = anyhow::Error::from(TrackerError::InvalidStatus("Done".into()));
        assert_eq!(error_line(&err), "Error: Invalid status: Done");
    }

    #[test]
    fn test_error_line_keeps_context() {
        colored::control::set_override(false);
        let err = anyhow::Error::from(TrackerError::not_found("Project", "Portal"))
            .context("Failed to open database");
        assert_eq!(
            error_line(&err),
            "Error: Failed to open database: Project not found: Portal"
        );
    }
}
