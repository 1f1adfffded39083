#![forbid(unsafe_code)]

//! Scripted todo app over a persistent map.
//!
//! The list view re-renders only when the number of todos changes. Each row
//! is a binding on the `todo` template keyed by the todo id; when the list
//! changes, rows are reused by position and re-keyed with `set_arg`, so the
//! number of live subscriptions always equals the number of mounted views.

use im::OrdMap;
use obslice::{
    Accessor, AccessorBinding, ChangePolicy, NotifyConfig, Result, Slice, SliceBuilder,
    SubTemplate, Subscription, TaskQueue,
};

use crate::view::{RunSummary, ViewHost, settle};

#[derive(Debug, Clone, PartialEq)]
pub struct Todo {
    pub id: u64,
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoState {
    pub todos: OrdMap<u64, Todo>,
    pub next_id: u64,
}

type TodoMap = OrdMap<u64, Todo>;

pub fn todo_slice(config: &NotifyConfig, queue: &TaskQueue) -> Result<Slice<TodoState>> {
    Slice::builder(TodoState::default())
        .label("todos")
        .edit_publisher("add_todo", |s: &mut TodoState, (): ()| {
            s.next_id += 1;
            let id = s.next_id;
            s.todos.insert(
                id,
                Todo {
                    id,
                    text: String::new(),
                    done: false,
                },
            );
        })
        .edit_publisher("update_todo_text", |s: &mut TodoState, (id, text): (u64, String)| {
            if let Some(todo) = s.todos.get_mut(&id) {
                todo.text = text;
            }
        })
        .edit_publisher("toggle_todo_done", |s: &mut TodoState, id: u64| {
            if let Some(todo) = s.todos.get_mut(&id) {
                todo.done = !todo.done;
            }
        })
        .edit_publisher("remove_todo", |s: &mut TodoState, id: u64| {
            s.todos.remove(&id);
        })
        .template("todos", |(): ()| {
            SubTemplate::custom(
                |s: &TodoState| s.todos.clone(),
                ChangePolicy::from_fn(|prev: &TodoMap, next: &TodoMap| prev.len() != next.len()),
            )
        })
        .template("todo", |id: u64| {
            SubTemplate::new(move |s: &TodoState| s.todos.get(&id).cloned())
        })
        .config(config, queue)
        .map(SliceBuilder::build)
}

pub struct TodoApp {
    slice: Slice<TodoState>,
    host: ViewHost,
    todo: Accessor<TodoState, u64, Option<Todo>>,
    list: AccessorBinding<TodoState, (), TodoMap>,
    rows: Vec<AccessorBinding<TodoState, u64, Option<Todo>>>,
    _logger: Subscription,
}

impl TodoApp {
    pub fn new(config: &NotifyConfig, queue: &TaskQueue) -> Result<Self> {
        let slice = todo_slice(config, queue)?;
        let host = ViewHost::new();

        let todo = slice.accessor::<u64, Option<Todo>>("todo")?;
        let mut list = slice.accessor::<(), TodoMap>("todos")?.bind(());
        list.attach(host.invalidator("list"));

        let logger = slice.sub(
            |s: &TodoState| s.clone(),
            |s: &TodoState| {
                let done = s.todos.values().filter(|t| t.done).count();
                tracing::debug!(todos = s.todos.len(), done, "todo state");
            },
        );

        let app = Self {
            slice,
            host,
            todo,
            list,
            rows: Vec::new(),
            _logger: logger,
        };
        app.render("list");
        Ok(app)
    }

    pub fn add_todos(&self, n: usize) -> Result<()> {
        let _batch = self.slice.batch();
        for _ in 0..n {
            self.slice.publish("add_todo", ())?;
        }
        Ok(())
    }

    pub fn set_text(&self, id: u64, text: impl Into<String>) -> Result<()> {
        self.slice.publish("update_todo_text", (id, text.into()))
    }

    pub fn toggle(&self, id: u64) -> Result<()> {
        self.slice.publish("toggle_todo_done", id)
    }

    pub fn remove(&self, id: u64) -> Result<()> {
        self.slice.publish("remove_todo", id)
    }

    /// Re-render invalidated views, reconciling rows when the list drew.
    pub fn frame(&mut self) -> usize {
        let dirty = self.host.take_dirty();
        let mut drawn = 0;
        if dirty.iter().any(|view| view == "list") {
            self.render("list");
            self.reconcile_rows();
            drawn += 1;
        }
        // Rows may have been invalidated by reconciliation too.
        let mut rows: Vec<String> = dirty.into_iter().filter(|view| view != "list").collect();
        rows.extend(self.host.take_dirty());
        rows.sort();
        rows.dedup();
        for view in &rows {
            self.render(view);
        }
        drawn + rows.len()
    }

    fn reconcile_rows(&mut self) {
        let ids: Vec<u64> = self.list.with(|todos| todos.keys().copied().collect());
        self.rows.truncate(ids.len());
        for (index, id) in ids.iter().copied().enumerate() {
            let invalidate = self.host.invalidator(row_name(index));
            if index < self.rows.len() {
                if self.rows[index].set_arg(id) {
                    invalidate();
                }
            } else {
                let mut row = self.todo.bind(id);
                row.attach(self.host.invalidator(row_name(index)));
                invalidate();
                self.rows.push(row);
            }
        }
    }

    fn render(&self, view: &str) {
        let line = if view == "list" {
            format!("list of {} todos", self.list.with(|todos| todos.len()))
        } else {
            let row = view
                .strip_prefix("row-")
                .and_then(|index| index.parse::<usize>().ok())
                .and_then(|index| self.rows.get(index));
            match row.and_then(|row| row.get()) {
                Some(todo) => format!(
                    "[{}] #{} {}",
                    if todo.done { 'x' } else { ' ' },
                    todo.id,
                    if todo.text.is_empty() { "(empty)" } else { todo.text.as_str() }
                ),
                None => format!("{view} (gone)"),
            }
        };
        self.host.record(view, line);
    }

    /// Bulk-add `todos`, edit the first, toggle the second and delete the
    /// first, drawing a frame after each step.
    pub fn run(todos: usize, config: &NotifyConfig, queue: &TaskQueue) -> Result<RunSummary> {
        let mut app = Self::new(config, queue)?;
        let step = |app: &mut Self| {
            settle(queue);
            app.frame();
        };

        app.add_todos(todos)?;
        step(&mut app);

        if todos > 0 {
            app.set_text(1, "write the demo")?;
            step(&mut app);
        }
        if todos > 1 {
            app.toggle(2)?;
            step(&mut app);
        }
        if todos > 0 {
            app.remove(1)?;
            step(&mut app);
        }

        let state = app.slice.get();
        Ok(RunSummary {
            app: "todo",
            final_state: format!(
                "{} todos, {} done",
                state.todos.len(),
                state.todos.values().filter(|t| t.done).count()
            ),
            last_frame: app.host.last_frame(),
            renders: app.host.render_counts(),
            stats: app.slice.stats(),
        })
    }
}

fn row_name(index: usize) -> String {
    format!("row-{index}")
}
