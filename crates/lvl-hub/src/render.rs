use handlebars::{Handlebars, RenderError, TemplateError};
use lvl_core::SessionSnapshot;
use serde::Serialize;

const INDEX_TEMPLATE: &str = include_str!("../templates/index.hbs");
const APP_TEMPLATE: &str = include_str!("../templates/app.hbs");

/// Renders session state into the full page or the `#app` fragment that
/// mutating routes swap in place.
pub struct Renderer {
    registry: Handlebars<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_template_string("app", APP_TEMPLATE)?;
        registry.register_template_string("index", INDEX_TEMPLATE)?;
        Ok(Self { registry })
    }

    pub fn page(&self, snapshot: &SessionSnapshot) -> Result<String, RenderError> {
        self.registry.render("index", &PageView::from_snapshot(snapshot))
    }

    pub fn fragment(&self, snapshot: &SessionSnapshot) -> Result<String, RenderError> {
        self.registry.render("app", &PageView::from_snapshot(snapshot))
    }
}

#[derive(Debug, Serialize)]
struct PageView<'a> {
    session: &'a str,
    total_xp: u64,
    level: u64,
    next_level: u64,
    progress: u8,
    xp_to_next_level: u64,
    open_tasks: Vec<TaskView<'a>>,
    completed_tasks: Vec<TaskView<'a>>,
    unlockables: Vec<UnlockableView<'a>>,
}

#[derive(Debug, Serialize)]
struct TaskView<'a> {
    id: i64,
    name: &'a str,
    xp: u32,
}

#[derive(Debug, Serialize)]
struct UnlockableView<'a> {
    level: u64,
    description: &'a str,
    unlocked: bool,
}

impl<'a> PageView<'a> {
    fn from_snapshot(snapshot: &'a SessionSnapshot) -> Self {
        let progress = snapshot.progress();
        let (completed, open): (Vec<_>, Vec<_>) =
            snapshot.tasks.iter().partition(|task| task.completed);
        let to_view = |task: &'a lvl_core::Task| TaskView {
            id: task.id,
            name: &task.name,
            xp: task.xp,
        };

        Self {
            session: snapshot.session.as_str(),
            total_xp: progress.total_xp,
            level: progress.level,
            next_level: progress.level + 1,
            progress: progress.percentage,
            xp_to_next_level: progress.xp_to_next_level,
            open_tasks: open.into_iter().map(to_view).collect(),
            completed_tasks: completed.into_iter().map(to_view).collect(),
            unlockables: snapshot
                .unlockables
                .iter()
                .map(|unlockable| UnlockableView {
                    level: unlockable.level,
                    description: &unlockable.description,
                    unlocked: snapshot.is_unlocked(unlockable.level),
                })
                .collect(),
        }
    }
}
