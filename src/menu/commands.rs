//! Menu loop and the five task commands, over any line reader and writer.

use std::io::{BufRead, Write};

use tracing::debug;

use super::storage::{InMemoryStorage, MenuTask};
use crate::tasks::model::{DESCRIPTION_MAX_LENGTH, TITLE_MAX_LENGTH};

/// Titles longer than this are cut in the task table.
const TITLE_COLUMN_WIDTH: usize = 40;

const RULE: &str = "------------------------------";

/// Why a command stopped early.
#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input closed; the menu exits cleanly.
    #[error("end of input")]
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Add,
    View,
    Update,
    Delete,
    Complete,
    Exit,
}

impl MenuChoice {
    pub const ALL: [MenuChoice; 6] = [
        MenuChoice::Add,
        MenuChoice::View,
        MenuChoice::Update,
        MenuChoice::Delete,
        MenuChoice::Complete,
        MenuChoice::Exit,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Self::Add => 1,
            Self::View => 2,
            Self::Update => 3,
            Self::Delete => 4,
            Self::Complete => 5,
            Self::Exit => 6,
        }
    }
}

impl std::fmt::Display for MenuChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Add => write!(f, "Add Task"),
            Self::View => write!(f, "View Tasks"),
            Self::Update => write!(f, "Update Task"),
            Self::Delete => write!(f, "Delete Task"),
            Self::Complete => write!(f, "Mark Complete"),
            Self::Exit => write!(f, "Exit"),
        }
    }
}

impl std::str::FromStr for MenuChoice {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::Add),
            "2" => Ok(Self::View),
            "3" => Ok(Self::Update),
            "4" => Ok(Self::Delete),
            "5" => Ok(Self::Complete),
            "6" => Ok(Self::Exit),
            _ => Err("Invalid choice. Please enter a number from 1 to 6.".to_string()),
        }
    }
}

/// Cut a title to the table width, marking the cut with `...`.
pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= TITLE_COLUMN_WIDTH {
        return title.to_string();
    }
    let kept: String = title.chars().take(TITLE_COLUMN_WIDTH - 3).collect();
    format!("{kept}...")
}

/// Interactive menu over a reader/writer pair.
pub struct Menu<R, W> {
    storage: InMemoryStorage,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Menu<R, W> {
    pub fn new(storage: InMemoryStorage, input: R, output: W) -> Self {
        Self {
            storage,
            input,
            output,
        }
    }

    pub fn storage(&self) -> &InMemoryStorage {
        &self.storage
    }

    /// Run until Exit is chosen or input ends.
    pub fn run(&mut self) -> std::io::Result<()> {
        loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) | Err(MenuError::EndOfInput) => break,
                Err(MenuError::Io(e)) => return Err(e),
            }
            writeln!(self.output)?;
        }
        writeln!(self.output)?;
        writeln!(self.output, "Goodbye! Thank you for using Todo App.")?;
        self.output.flush()
    }

    /// Show the menu and run one command. `Ok(false)` means exit.
    fn step(&mut self) -> Result<bool, MenuError> {
        self.display()?;
        let choice = self.read_choice()?;
        debug!(choice = %choice, "Menu choice");
        match choice {
            MenuChoice::Add => self.add_task()?,
            MenuChoice::View => self.view_tasks()?,
            MenuChoice::Update => self.update_task()?,
            MenuChoice::Delete => self.delete_task()?,
            MenuChoice::Complete => self.complete_task()?,
            MenuChoice::Exit => return Ok(false),
        }
        Ok(true)
    }

    fn display(&mut self) -> Result<(), MenuError> {
        writeln!(self.output, "Todo App")?;
        writeln!(self.output)?;
        for choice in MenuChoice::ALL {
            writeln!(self.output, "  [{}] {}", choice.number(), choice)?;
        }
        writeln!(self.output)?;
        writeln!(self.output, "Enter your choice (1-6):")?;
        Ok(())
    }

    fn read_choice(&mut self) -> Result<MenuChoice, MenuError> {
        loop {
            let line = self.prompt("> ")?;
            match line.parse::<MenuChoice>() {
                Ok(choice) => return Ok(choice),
                Err(message) => self.error(&message)?,
            }
        }
    }

    // ── Output helpers ──────────────────────────────────────────────

    fn prompt(&mut self, label: &str) -> Result<String, MenuError> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(MenuError::EndOfInput);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn heading(&mut self, title: &str) -> Result<(), MenuError> {
        writeln!(self.output)?;
        writeln!(self.output, "{title}")?;
        writeln!(self.output, "{RULE}")?;
        Ok(())
    }

    fn error(&mut self, message: &str) -> Result<(), MenuError> {
        writeln!(self.output, "Error: {message}")?;
        Ok(())
    }

    fn info(&mut self, message: &str) -> Result<(), MenuError> {
        writeln!(self.output, "Info: {message}")?;
        Ok(())
    }

    fn success(&mut self, message: &str) -> Result<(), MenuError> {
        writeln!(self.output)?;
        writeln!(self.output, "Success! {message}")?;
        Ok(())
    }

    /// Prompt until the input names an existing task.
    fn read_task_id(&mut self) -> Result<MenuTask, MenuError> {
        loop {
            let raw = self.prompt("Enter Task ID: ")?;
            let Ok(id) = raw.trim().parse::<u64>() else {
                self.error("Invalid input. Please enter a number.")?;
                continue;
            };
            match self.storage.get(id) {
                Some(task) => return Ok(task),
                None => self.error(&format!("Task #{id} not found."))?,
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────

    fn add_task(&mut self) -> Result<(), MenuError> {
        self.heading("Add New Task")?;

        let title = loop {
            let raw = self.prompt("Title: ")?;
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                self.error("Title cannot be empty.")?;
            } else if trimmed.chars().count() > TITLE_MAX_LENGTH {
                self.error(&format!(
                    "Title must be {TITLE_MAX_LENGTH} characters or less."
                ))?;
            } else {
                break trimmed.to_string();
            }
        };

        let description = loop {
            let raw = self.prompt("Description (optional): ")?;
            if raw.trim().chars().count() > DESCRIPTION_MAX_LENGTH {
                self.error(&format!(
                    "Description must be {DESCRIPTION_MAX_LENGTH} characters or less."
                ))?;
            } else {
                break raw;
            }
        };

        match self.storage.add(&title, &description) {
            Ok(task) => self.success(&format!("Task #{} added: {}", task.id, task.title)),
            Err(e) => self.error(&e.message),
        }
    }

    fn view_tasks(&mut self) -> Result<(), MenuError> {
        self.heading("Task List")?;

        let tasks = self.storage.get_all();
        if tasks.is_empty() {
            writeln!(self.output)?;
            return self.info("No tasks yet. Use option 1 to add a task!");
        }

        writeln!(self.output)?;
        writeln!(
            self.output,
            "{:>5}  {:<40}  {:^8}  {:<16}",
            "ID", "Title", "Status", "Created"
        )?;
        for task in &tasks {
            let status = if task.completed { "[x]" } else { "[ ]" };
            writeln!(
                self.output,
                "{:>5}  {:<40}  {:^8}  {:<16}",
                task.id,
                truncate_title(&task.title),
                status,
                task.created_at.format("%Y-%m-%d %H:%M").to_string()
            )?;
        }
        writeln!(self.output)?;
        writeln!(self.output, "Total: {} task(s)", tasks.len())?;
        Ok(())
    }

    fn update_task(&mut self) -> Result<(), MenuError> {
        self.heading("Update Task")?;
        if self.storage.is_empty() {
            return self.info("No tasks to update. Add a task first!");
        }

        let task = self.read_task_id()?;
        writeln!(self.output)?;
        writeln!(self.output, "Current title: {}", task.title)?;
        let current_description = if task.description.is_empty() {
            "(empty)"
        } else {
            task.description.as_str()
        };
        writeln!(self.output, "Current description: {current_description}")?;
        writeln!(self.output)?;
        writeln!(self.output, "Press Enter to keep current value")?;

        let new_title = self.prompt("New title: ")?;
        let new_description = self.prompt("New description: ")?;
        let new_title = Some(new_title.trim()).filter(|t| !t.is_empty());
        let new_description = Some(new_description.trim()).filter(|d| !d.is_empty());

        if new_title.is_some_and(|t| t.chars().count() > TITLE_MAX_LENGTH) {
            return self.error(&format!(
                "Title must be {TITLE_MAX_LENGTH} characters or less."
            ));
        }
        if new_description.is_some_and(|d| d.chars().count() > DESCRIPTION_MAX_LENGTH) {
            return self.error(&format!(
                "Description must be {DESCRIPTION_MAX_LENGTH} characters or less."
            ));
        }
        if new_title.is_none() && new_description.is_none() {
            return self.info("No changes made.");
        }

        match self.storage.update(task.id, new_title, new_description) {
            Ok(Some(updated)) => {
                self.success(&format!("Task #{} updated: {}", updated.id, updated.title))
            }
            Ok(None) => self.error(&format!("Task #{} not found.", task.id)),
            Err(e) => self.error(&e.message),
        }
    }

    fn delete_task(&mut self) -> Result<(), MenuError> {
        self.heading("Delete Task")?;
        if self.storage.is_empty() {
            return self.info("No tasks to delete. Add a task first!");
        }

        let task = self.read_task_id()?;
        match self.storage.delete(task.id) {
            Some(removed) => {
                self.success(&format!("Task #{} deleted: {}", removed.id, removed.title))
            }
            None => self.error(&format!("Task #{} not found.", task.id)),
        }
    }

    fn complete_task(&mut self) -> Result<(), MenuError> {
        self.heading("Mark Task Complete")?;
        if self.storage.is_empty() {
            return self.info("No tasks to complete. Add a task first!");
        }

        let task = self.read_task_id()?;
        if task.completed {
            return self.info(&format!("Task #{} is already completed.", task.id));
        }
        match self.storage.mark_complete(task.id) {
            Some(done) => self.success(&format!(
                "Task #{} marked as complete: {}",
                done.id, done.title
            )),
            None => self.error(&format!("Task #{} not found.", task.id)),
        }
    }
}
