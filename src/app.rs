use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use eframe::egui::{self, Color32, TextureHandle, TextureOptions, ViewportCommand};

use crate::auto_window::{AutoWindowMode, WindowParams};
use crate::classify::{classify, EditScope};
use crate::codec::Codec;
use crate::config::{AppConfig, Palette};
use crate::consistency::{analyze, ConsistencyGroup};
use crate::dataset::{Dataset, ElementPath, ElementValue, SampleError, TagElement, TagId};
use crate::edit_dialog::EditDialog;
use crate::edit_prompt::{EditPrompt, PromptResponse, PromptSurface};
use crate::registry::{DatasetRegistry, LoadError, LoadReport, LoadWarning};
use crate::renderer::render_display_buffer;
use crate::storage::FsStore;
use crate::transaction::{
    EditError, FileOutcome, PersistedEdit, TransactionManager, TransactionReport,
};
use crate::windowing::{compute_display, DisplayBuffer, WindowSpec, WINDOW_PRESETS};

pub const APP_TITLE: &str = "tagscope";
const SUMMARY_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DisplayKey {
    index: usize,
    revision: u64,
    preset: usize,
}

type DisplayResult = (DisplayKey, Result<DisplayBuffer, SampleError>);

struct DisplayJob {
    key: DisplayKey,
    cancel: Arc<AtomicBool>,
    receiver: Receiver<DisplayResult>,
}

pub struct TagScopeApp {
    config: AppConfig,
    codec: Arc<dyn Codec>,
    store: Arc<FsStore>,
    manager: TransactionManager,
    registry: DatasetRegistry,
    source: PathBuf,
    active: usize,
    selected: Option<ElementPath>,
    scroll_to_selected: bool,
    show_image: bool,
    preset: usize,
    texture: Option<TextureHandle>,
    shown_key: Option<DisplayKey>,
    shown_window: Option<WindowParams>,
    display_error: Option<String>,
    display_job: Option<DisplayJob>,
    dialog: EditDialog,
    commit_receiver: Option<Receiver<Result<PersistedEdit, EditError>>>,
    load_receiver: Option<Receiver<Result<LoadReport, LoadError>>>,
    consistency_cache: Option<(TagId, u64, ConsistencyGroup)>,
    warnings: Vec<LoadWarning>,
    status_line: String,
    last_title: String,
}

impl TagScopeApp {
    pub fn new(config: AppConfig, codec: Arc<dyn Codec>, report: LoadReport) -> Self {
        let preset = config.default_preset.min(WINDOW_PRESETS.len() - 1);
        let mut app = Self {
            manager: TransactionManager::new(Arc::clone(&codec)),
            config,
            codec,
            store: Arc::new(FsStore::new()),
            registry: DatasetRegistry::default(),
            source: PathBuf::new(),
            active: 0,
            selected: None,
            scroll_to_selected: false,
            show_image: false,
            preset,
            texture: None,
            shown_key: None,
            shown_window: None,
            display_error: None,
            display_job: None,
            dialog: EditDialog::default(),
            commit_receiver: None,
            load_receiver: None,
            consistency_cache: None,
            warnings: Vec::new(),
            status_line: String::new(),
            last_title: String::new(),
        };
        app.install_report(report);
        app
    }

    fn install_report(&mut self, report: LoadReport) {
        self.status_line = if report.warnings.is_empty() {
            format!("Loaded {} record(s) from {}", report.registry.len(), report.source.display())
        } else {
            format!(
                "Loaded {} record(s) from {}, skipped {} unreadable file(s)",
                report.registry.len(),
                report.source.display(),
                report.warnings.len()
            )
        };
        self.registry = report.registry;
        self.source = report.source;
        self.warnings = report.warnings;
        // A new registry is a new session, so backups are taken afresh.
        self.store = Arc::new(FsStore::new());
        self.active = 0;
        self.selected = self.first_path();
        self.cancel_display_job();
        self.shown_key = None;
        self.shown_window = None;
        self.display_error = None;
        self.consistency_cache = None;
    }

    fn apply_theme(ctx: &egui::Context, palette: &Palette) {
        let rgb = |[r, g, b]: [u8; 3]| Color32::from_rgb(r, g, b);
        let mut visuals = egui::Visuals::dark();
        let line_base = rgb(palette.panel).gamma_multiply(1.6);

        visuals.panel_fill = rgb(palette.surface);
        visuals.window_fill = rgb(palette.panel);
        visuals.faint_bg_color = rgb(palette.panel);
        visuals.extreme_bg_color = rgb(palette.surface);
        visuals.window_stroke = egui::Stroke::new(1.0, line_base);
        visuals.selection.bg_fill = rgb(palette.primary);
        visuals.hyperlink_color = rgb(palette.accent);
        visuals.warn_fg_color = rgb(palette.warning);
        visuals.error_fg_color = rgb(palette.error);
        visuals.widgets.noninteractive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.inactive.bg_stroke = egui::Stroke::new(1.0, line_base);
        visuals.widgets.hovered.bg_stroke = egui::Stroke::new(1.0, rgb(palette.accent));
        visuals.widgets.active.bg_stroke = egui::Stroke::new(1.0, rgb(palette.primary));
        ctx.set_visuals(visuals);
    }

    fn palette_color(&self, pick: fn(&Palette) -> [u8; 3]) -> Color32 {
        let [r, g, b] = pick(&self.config.theme.palette());
        Color32::from_rgb(r, g, b)
    }

    fn is_busy(&self) -> bool {
        self.commit_receiver.is_some() || self.load_receiver.is_some()
    }

    fn active_dataset(&self) -> Option<&Arc<Dataset>> {
        self.registry.get(self.active)
    }

    fn first_path(&self) -> Option<ElementPath> {
        self.active_dataset()
            .and_then(|dataset| dataset.elements().next())
            .map(|element| element.id.into())
    }

    fn selectable_tags(&self) -> Vec<TagId> {
        self.active_dataset()
            .map(|dataset| dataset.elements().map(|element| element.id).collect())
            .unwrap_or_default()
    }

    fn move_selection(&mut self, step: isize) {
        let tags = self.selectable_tags();
        if tags.is_empty() {
            return;
        }
        // A nested selection moves from the top-level sequence holding it.
        let current = self.selected.as_ref().and_then(|path| {
            let anchor = path.items.first().map_or(path.tag, |step| step.sequence);
            tags.iter().position(|candidate| *candidate == anchor)
        });
        let next = match current {
            Some(position) => position.saturating_add_signed(step).min(tags.len() - 1),
            None => 0,
        };
        self.selected = Some(tags[next].into());
        self.scroll_to_selected = true;
    }

    fn navigate(&mut self, step: isize) {
        let count = self.registry.len();
        if count < 2 {
            return;
        }
        let next = (self.active as isize + step).rem_euclid(count as isize) as usize;
        self.active = next;
        // Keep the element selected when the next slice has it too.
        let keep = self.selected.as_ref().is_some_and(|path| {
            self.active_dataset()
                .is_some_and(|dataset| dataset.element_at(path).is_some())
        });
        if !keep {
            self.selected = self.first_path();
        }
    }

    fn cycle_preset(&mut self, step: isize) {
        let count = WINDOW_PRESETS.len() as isize;
        self.preset = (self.preset as isize + step).rem_euclid(count) as usize;
        self.status_line = format!("Window: {}", WINDOW_PRESETS[self.preset].name);
    }

    fn open_editor(&mut self) {
        if self.manager.in_flight() {
            self.status_line = "A save is still in progress".to_string();
            return;
        }
        let Some(path) = self.selected.clone() else {
            self.status_line = "Select a tag to edit".to_string();
            return;
        };
        match EditPrompt::build(&self.registry, self.active, path.clone()) {
            Some(prompt) => self.dialog.present(prompt),
            None => self.status_line = format!("{path} is not present in this record"),
        }
    }

    fn handle_prompt_response(&mut self, response: PromptResponse, ctx: &egui::Context) {
        let PromptResponse::Submit { path, value, scope } = response else {
            return;
        };

        let transaction = self.manager.propose(path, &value, scope);
        let label = transaction.path.to_string();
        match self.manager.begin(&self.registry, transaction) {
            Ok(prepared) => {
                let count = prepared.write_count();
                let token = prepared.token();
                let store = Arc::clone(&self.store);
                let (tx, rx) = mpsc::channel();
                let repaint = ctx.clone();
                thread::spawn(move || {
                    let outcome = prepared.persist(store.as_ref());
                    let _ = tx.send(outcome);
                    repaint.request_repaint();
                });
                self.commit_receiver = Some(rx);
                self.status_line = format!("[{token}] Saving {label} to {count} file(s)...");
            }
            Err(err) => {
                self.status_line = err.to_string();
            }
        }
    }

    fn poll_commit(&mut self) {
        let Some(receiver) = self.commit_receiver.take() else {
            return;
        };

        let outcome = match receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => {
                self.commit_receiver = Some(receiver);
                return;
            }
            Err(TryRecvError::Disconnected) => Err(EditError::WorkerLost),
        };

        match self.manager.finish(&mut self.registry, outcome) {
            Ok(report) => self.status_line = commit_summary(&report),
            Err(err) => {
                log::warn!("Edit failed: {err}");
                self.status_line = err.to_string();
            }
        }
    }

    fn open_dialog(&mut self, ctx: &egui::Context, folder: bool) {
        if self.is_busy() {
            self.status_line = "Wait for the current operation to finish".to_string();
            return;
        }
        let dialog = rfd::FileDialog::new();
        let picked = if folder {
            dialog.pick_folder()
        } else {
            dialog.add_filter("DICOM", &["dcm", "dicom"]).pick_file()
        };
        if let Some(path) = picked {
            self.start_load(path, ctx);
        }
    }

    fn start_load(&mut self, path: PathBuf, ctx: &egui::Context) {
        let codec = Arc::clone(&self.codec);
        let workers = self.config.load_workers;
        let (tx, rx) = mpsc::channel();
        let repaint = ctx.clone();
        self.status_line = format!("Loading {}...", path.display());
        thread::spawn(move || {
            let _ = tx.send(DatasetRegistry::load(&path, codec, workers));
            repaint.request_repaint();
        });
        self.load_receiver = Some(rx);
    }

    fn poll_load(&mut self) {
        let Some(receiver) = self.load_receiver.take() else {
            return;
        };
        match receiver.try_recv() {
            Ok(Ok(report)) => self.install_report(report),
            Ok(Err(err)) => {
                log::warn!("Open failed: {err}");
                self.status_line = err.to_string();
            }
            Err(TryRecvError::Empty) => self.load_receiver = Some(receiver),
            Err(TryRecvError::Disconnected) => {
                self.status_line = "Loader stopped unexpectedly".to_string();
            }
        }
    }

    fn cancel_display_job(&mut self) {
        if let Some(job) = self.display_job.take() {
            job.cancel.store(true, Ordering::Relaxed);
        }
    }

    fn wanted_display_key(&self) -> Option<DisplayKey> {
        self.registry.get(self.active)?;
        Some(DisplayKey {
            index: self.active,
            revision: self.registry.revision(self.active),
            preset: self.preset,
        })
    }

    fn ensure_display_job(&mut self, ctx: &egui::Context) {
        if !self.show_image {
            return;
        }
        let Some(key) = self.wanted_display_key() else {
            return;
        };
        let pending = self.display_job.as_ref().is_some_and(|job| job.key == key);
        if self.shown_key == Some(key) || pending {
            return;
        }
        let Some(dataset) = self.registry.get(key.index).cloned() else {
            return;
        };

        self.cancel_display_job();
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<DisplayResult>();
        let spec = WINDOW_PRESETS[key.preset].spec;
        let auto = self.config.auto_window;
        let worker_cancel = Arc::clone(&cancel);
        let repaint = ctx.clone();
        thread::spawn(move || {
            let result = build_display(&dataset, spec, auto, &worker_cancel);
            match result {
                Some(result) => {
                    let _ = tx.send((key, result));
                    repaint.request_repaint();
                }
                None => log::warn!("Cancelled display job for {}", dataset.file_name()),
            }
        });
        self.display_job = Some(DisplayJob {
            key,
            cancel,
            receiver: rx,
        });
    }

    fn poll_display_job(&mut self, ctx: &egui::Context) {
        let Some(job) = self.display_job.take() else {
            return;
        };
        let (key, result) = match job.receiver.try_recv() {
            Ok(received) => received,
            Err(TryRecvError::Empty) => {
                self.display_job = Some(job);
                return;
            }
            Err(TryRecvError::Disconnected) => return,
        };
        if Some(key) != self.wanted_display_key() {
            return;
        }

        self.shown_key = Some(key);
        match result {
            Ok(buffer) => {
                let invert = self
                    .registry
                    .get(key.index)
                    .is_some_and(|dataset| dataset.inverts());
                let image = render_display_buffer(&buffer, invert);
                if let Some(texture) = self.texture.as_mut() {
                    texture.set(image, TextureOptions::LINEAR);
                } else {
                    self.texture =
                        Some(ctx.load_texture("dicom-image", image, TextureOptions::LINEAR));
                }
                self.shown_window = Some(buffer.window);
                self.display_error = None;
            }
            Err(err) => {
                self.texture = None;
                self.shown_window = None;
                self.display_error = Some(err.to_string());
            }
        }
    }

    fn consistency_for(&mut self, tag: TagId) -> Option<&ConsistencyGroup> {
        if self.registry.len() < 2 {
            return None;
        }
        let generation = self.registry.generation();
        let fresh = matches!(
            &self.consistency_cache,
            Some((cached, seen, _)) if *cached == tag && *seen == generation
        );
        if !fresh {
            let group = analyze(tag, self.registry.datasets());
            self.consistency_cache = Some((tag, generation, group));
        }
        self.consistency_cache.as_ref().map(|(_, _, group)| group)
    }

    fn window_title(&self) -> String {
        match self.active_dataset() {
            Some(dataset) => format!(
                "{APP_TITLE} - {} ({}/{})",
                dataset.file_name(),
                self.active + 1,
                self.registry.len()
            ),
            None => APP_TITLE.to_string(),
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if self.dialog.is_open() || ctx.wants_keyboard_input() {
            return;
        }

        let mut quit = false;
        let mut navigate = 0isize;
        let mut select = 0isize;
        let mut preset = 0isize;
        let mut edit = false;
        let mut toggle_image = false;
        ctx.input_mut(|input| {
            let mut pressed = |key| input.consume_key(egui::Modifiers::NONE, key);
            quit = pressed(egui::Key::Q);
            if pressed(egui::Key::ArrowLeft) || pressed(egui::Key::H) {
                navigate = -1;
            } else if pressed(egui::Key::ArrowRight) || pressed(egui::Key::L) {
                navigate = 1;
            }
            if pressed(egui::Key::ArrowUp) || pressed(egui::Key::K) {
                select = -1;
            } else if pressed(egui::Key::ArrowDown) || pressed(egui::Key::J) {
                select = 1;
            }
            if pressed(egui::Key::W) {
                preset = -1;
            } else if pressed(egui::Key::S) {
                preset = 1;
            }
            edit = pressed(egui::Key::E) || pressed(egui::Key::Enter);
            toggle_image = pressed(egui::Key::I);
        });

        if quit {
            ctx.send_viewport_cmd(ViewportCommand::Close);
            return;
        }
        if navigate != 0 {
            self.navigate(navigate);
        }
        if select != 0 {
            self.move_selection(select);
        }
        if preset != 0 {
            self.cycle_preset(preset);
        }
        if toggle_image {
            self.show_image = !self.show_image;
        }
        if edit {
            self.open_editor();
        }
    }

    fn show_tag_tree(&mut self, ui: &mut egui::Ui) {
        let Some(dataset) = self.active_dataset().cloned() else {
            ui.label("No records loaded.");
            return;
        };

        let selected = self.selected.clone();
        let mut tree = TagTree {
            selected: selected.as_ref(),
            scope: EditScope::Single(self.active),
            scroll_to_selected: std::mem::take(&mut self.scroll_to_selected),
            read_only_color: ui.visuals().weak_text_color(),
            clicked: None,
        };
        // The open dialog owns its element until it answers.
        let enabled = !self.dialog.is_open();

        egui::ScrollArea::vertical()
            .id_salt("tag-tree")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                ui.add_enabled_ui(enabled, |ui| {
                    for element in dataset.elements() {
                        let path = ElementPath::from(element.id);
                        match &element.value {
                            ElementValue::Sequence(items) => {
                                tree.sequence(ui, element, items, &path);
                            }
                            _ => tree.leaf(ui, element, path),
                        }
                    }
                });
            });

        if let Some((path, open)) = tree.clicked {
            self.selected = Some(path);
            if open {
                self.open_editor();
            }
        }
    }

    fn show_image_panel(&mut self, ui: &mut egui::Ui) {
        if let Some(message) = &self.display_error {
            ui.centered_and_justified(|ui| {
                ui.colored_label(ui.visuals().warn_fg_color, message.as_str());
            });
            return;
        }
        let current = self.shown_key.is_some() && self.shown_key == self.wanted_display_key();
        let Some(texture) = self.texture.as_ref().filter(|_| current) else {
            ui.centered_and_justified(|ui| {
                ui.label("Rendering...");
            });
            return;
        };

        let available = ui.available_size();
        let (canvas_rect, _) = ui.allocate_exact_size(available, egui::Sense::hover());
        let image_size = texture.size_vec2();
        let fit_scale = (canvas_rect.width() / image_size.x)
            .min(canvas_rect.height() / image_size.y)
            .max(0.01);
        let image_rect = egui::Rect::from_center_size(canvas_rect.center(), image_size * fit_scale);
        ui.painter().image(
            texture.id(),
            image_rect,
            egui::Rect::from_min_max(egui::Pos2::ZERO, egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );
    }

    fn show_status_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let window = match (WINDOW_PRESETS[self.preset].spec, self.shown_window) {
                (WindowSpec::Auto, Some(params)) if self.show_image => format!(
                    "Auto ({:.0}/{:.0})",
                    params.width, params.level
                ),
                _ => WINDOW_PRESETS[self.preset].name.to_string(),
            };
            ui.label(format!("Window: {window}"));
            ui.separator();
            let top_level = self.selected.as_ref().filter(|path| !path.is_nested());
            if let Some(tag) = top_level.map(|path| path.tag) {
                let summary = self.consistency_for(tag).map(|group| {
                    if group.is_consistent() {
                        format!("Same value in {} file(s)", group.present_count())
                    } else {
                        group.summary(SUMMARY_LIMIT)
                    }
                });
                if let Some(summary) = summary {
                    ui.label(format!("{tag}: {summary}"));
                    ui.separator();
                }
            }
            ui.label(self.status_line.as_str());
        });

        if !self.warnings.is_empty() {
            egui::CollapsingHeader::new(format!("{} file(s) skipped", self.warnings.len()))
                .id_salt("load-warnings")
                .show(ui, |ui| {
                    for warning in &self.warnings {
                        ui.label(format!("{}: {}", display_name(&warning.path), warning.message));
                    }
                });
        }
        ui.weak("←/→ slice  ↑/↓ tag  E edit  I image  W/S window  Q quit");
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn commit_summary(report: &TransactionReport) -> String {
    let committed = report.count(FileOutcome::Committed);
    let unchanged = report.count(FileOutcome::Unchanged);
    let skipped = report.count(FileOutcome::SkippedAbsent);
    let shown = if report.value.is_empty() {
        "(empty)"
    } else {
        report.value.as_str()
    };
    let mut line = format!("Updated {} to {shown} in {committed} file(s)", report.path);
    if unchanged > 0 {
        line.push_str(&format!(", {unchanged} already had this value"));
    }
    if skipped > 0 {
        line.push_str(&format!(", {skipped} without the tag"));
    }
    let backups = report.created_backups();
    if !backups.is_empty() {
        let names = backups
            .iter()
            .map(|path| display_name(path))
            .collect::<Vec<_>>()
            .join(", ");
        line.push_str(&format!("; backed up {names}"));
    }
    line
}

/// Per-frame state of the tag tree: the current selection and what was clicked.
struct TagTree<'a> {
    selected: Option<&'a ElementPath>,
    scope: EditScope,
    scroll_to_selected: bool,
    read_only_color: Color32,
    clicked: Option<(ElementPath, bool)>,
}

impl TagTree<'_> {
    fn leaf(&mut self, ui: &mut egui::Ui, element: &TagElement, path: ElementPath) {
        let editable = classify(element.id, element.vr, self.scope).editable;
        let text = egui::RichText::new(format!("{}  {}", element.label(), element.display_value()))
            .monospace();
        let text = if editable {
            text
        } else {
            text.color(self.read_only_color)
        };
        let is_selected = self.selected == Some(&path);
        let response = ui.selectable_label(is_selected, text);
        if is_selected && self.scroll_to_selected {
            response.scroll_to_me(Some(egui::Align::Center));
        }
        if response.double_clicked() {
            self.clicked = Some((path, true));
        } else if response.clicked() {
            self.clicked = Some((path, false));
        }
    }

    fn sequence(
        &mut self,
        ui: &mut egui::Ui,
        element: &TagElement,
        items: &[Vec<TagElement>],
        path: &ElementPath,
    ) {
        let header = format!("{}  {}", element.label(), element.display_value());
        egui::CollapsingHeader::new(egui::RichText::new(header).monospace())
            .id_salt(path)
            .show(ui, |ui| {
                for (index, item) in items.iter().enumerate() {
                    egui::CollapsingHeader::new(format!("Item {}", index + 1))
                        .id_salt((path, index))
                        .show(ui, |ui| {
                            for child in item {
                                let child_path = path.child(index, child.id);
                                match &child.value {
                                    ElementValue::Sequence(nested) => {
                                        self.sequence(ui, child, nested, &child_path);
                                    }
                                    _ => self.leaf(ui, child, child_path),
                                }
                            }
                        });
                }
            });
    }
}

/// Returns `None` when cancelled between decode and windowing.
fn build_display(
    dataset: &Dataset,
    spec: WindowSpec,
    auto: AutoWindowMode,
    cancel: &AtomicBool,
) -> Option<Result<DisplayBuffer, SampleError>> {
    let samples = match dataset.samples() {
        Ok(samples) => samples,
        Err(err) => return Some(Err(err)),
    };
    if cancel.load(Ordering::Relaxed) {
        return None;
    }
    Some(Ok(compute_display(
        &samples.values,
        samples.rows,
        samples.columns,
        dataset.rescale(),
        spec,
        auto,
    )))
}

impl eframe::App for TagScopeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        Self::apply_theme(ctx, &self.config.theme.palette());
        if self.is_busy() {
            ctx.set_cursor_icon(egui::CursorIcon::Progress);
        }

        self.poll_load();
        self.poll_commit();
        self.handle_shortcuts(ctx);
        self.ensure_display_job(ctx);
        self.poll_display_job(ctx);

        let title = self.window_title();
        if title != self.last_title {
            ctx.send_viewport_cmd(ViewportCommand::Title(title.clone()));
            self.last_title = title;
        }

        let mut open_file = false;
        let mut open_folder = false;
        egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open File...").clicked() {
                        open_file = true;
                        ui.close_menu();
                    }
                    if ui.button("Open Folder...").clicked() {
                        open_folder = true;
                        ui.close_menu();
                    }
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(ViewportCommand::Close);
                    }
                });
                ui.separator();
                if ui.selectable_label(self.show_image, "Image").clicked() {
                    self.show_image = !self.show_image;
                }
                egui::ComboBox::from_id_salt("window-preset")
                    .selected_text(WINDOW_PRESETS[self.preset].name)
                    .show_ui(ui, |ui| {
                        for (index, preset) in WINDOW_PRESETS.iter().enumerate() {
                            ui.selectable_value(&mut self.preset, index, preset.name);
                        }
                    });
                ui.separator();
                ui.label(self.source.display().to_string());
            });
        });
        if open_file || open_folder {
            self.open_dialog(ctx, open_folder);
        }

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.show_status_bar(ui);
        });

        if self.show_image {
            egui::SidePanel::left("tags")
                .resizable(true)
                .default_width(520.0)
                .show(ctx, |ui| self.show_tag_tree(ui));
            egui::CentralPanel::default().show(ctx, |ui| self.show_image_panel(ui));
        } else {
            egui::CentralPanel::default().show(ctx, |ui| self.show_tag_tree(ui));
        }

        let warning = self.palette_color(|palette| palette.warning);
        let accent = self.palette_color(|palette| palette.accent);
        self.dialog.show(ctx, warning, accent);
        if let Some(response) = self.dialog.read_result() {
            self.handle_prompt_response(response, ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DicomCodec;
    use crate::fixtures::SliceFixture;

    fn app(count: i32) -> TagScopeApp {
        let registry = DatasetRegistry::from_datasets(
            (1..=count)
                .map(|number| SliceFixture::new(number).dataset(format!("s{number}.dcm")))
                .collect(),
        );
        let report = LoadReport {
            registry,
            warnings: Vec::new(),
            source: PathBuf::from("scans"),
        };
        TagScopeApp::new(AppConfig::from_sources(None, None), Arc::new(DicomCodec), report)
    }

    #[test]
    fn title_shows_file_and_position() {
        let mut app = app(3);
        assert_eq!(app.window_title(), "tagscope - s1.dcm (1/3)");
        app.navigate(-1);
        assert_eq!(app.window_title(), "tagscope - s3.dcm (3/3)");
    }

    #[test]
    fn navigation_keeps_selected_tag_when_present() {
        let mut app = app(2);
        let patient = TagId::new(0x0010, 0x0010);
        app.selected = Some(patient.into());
        app.navigate(1);
        assert_eq!(app.active, 1);
        assert_eq!(app.selected, Some(patient.into()));
    }

    #[test]
    fn selection_moves_through_top_level_tags() {
        let mut app = app(1);
        let tags = app
            .selectable_tags()
            .into_iter()
            .map(ElementPath::from)
            .collect::<Vec<_>>();
        assert_eq!(app.selected, tags.first().cloned());
        app.move_selection(1);
        assert_eq!(app.selected, tags.get(1).cloned());
        app.move_selection(-5);
        assert_eq!(app.selected, tags.first().cloned());
    }

    #[test]
    fn preset_cycling_wraps() {
        let mut app = app(1);
        app.cycle_preset(-1);
        assert_eq!(WINDOW_PRESETS[app.preset].name, "Mediastinum");
        app.cycle_preset(1);
        assert_eq!(app.preset, 0);
    }

    #[test]
    fn display_key_tracks_revision() {
        let mut app = app(2);
        let before = app.wanted_display_key().expect("key");
        let replacement = Arc::new(SliceFixture::new(1).dataset("s1.dcm"));
        app.registry.replace(vec![(0, replacement)]);
        let after = app.wanted_display_key().expect("key");
        assert_ne!(before, after);
        assert_eq!(after.revision, 1);
    }

    #[test]
    fn consistency_cache_refreshes_after_commit() {
        let mut app = app(2);
        let patient = TagId::new(0x0010, 0x0010);
        assert!(app.consistency_for(patient).expect("analysis").is_consistent());

        let edited = DicomCodec
            .with_value(
                app.registry.get(1).expect("slot"),
                &patient.into(),
                crate::dataset::Vr::PN,
                "Other^Name",
            )
            .expect("edit");
        app.registry.replace(vec![(1, Arc::new(edited))]);
        assert!(!app.consistency_for(patient).expect("analysis").is_consistent());
    }

    #[test]
    fn cancelled_display_job_produces_nothing() {
        let dataset = SliceFixture::new(1)
            .with_pixels(1, 2, vec![0, 100])
            .dataset("p.dcm");
        let cancel = AtomicBool::new(true);
        let spec = WINDOW_PRESETS[0].spec;
        assert!(build_display(&dataset, spec, AutoWindowMode::MinMax, &cancel).is_none());

        let cancel = AtomicBool::new(false);
        let buffer = build_display(&dataset, spec, AutoWindowMode::MinMax, &cancel)
            .expect("not cancelled")
            .expect("decodes");
        assert_eq!(buffer.pixels, vec![0, 255]);
    }

    fn display_buffer(samples: Vec<u16>) -> DisplayBuffer {
        let dataset = SliceFixture::new(1)
            .with_pixels(1, 2, samples)
            .dataset("p.dcm");
        let cancel = AtomicBool::new(false);
        build_display(&dataset, WINDOW_PRESETS[0].spec, AutoWindowMode::MinMax, &cancel)
            .expect("not cancelled")
            .expect("decodes")
    }

    fn deliver(app: &mut TagScopeApp, ctx: &egui::Context, key: DisplayKey, buffer: DisplayBuffer) {
        let (tx, rx) = mpsc::channel();
        tx.send((key, Ok(buffer))).expect("send");
        app.display_job = Some(DisplayJob {
            key,
            cancel: Arc::new(AtomicBool::new(false)),
            receiver: rx,
        });
        app.poll_display_job(ctx);
    }

    #[test]
    fn late_display_result_for_another_slice_is_discarded() {
        let ctx = egui::Context::default();
        let mut app = app(2);
        app.show_image = true;

        let first = app.wanted_display_key().expect("key");
        let shown = display_buffer(vec![0, 100]);
        let shown_window = shown.window;
        deliver(&mut app, &ctx, first, shown);
        assert_eq!(app.shown_key, Some(first));
        let texture_id = app.texture.as_ref().map(TextureHandle::id);
        assert!(texture_id.is_some());

        app.navigate(1);
        let stale = DisplayKey {
            revision: 7,
            ..first
        };
        deliver(&mut app, &ctx, stale, display_buffer(vec![0, 4000]));

        assert_eq!(app.shown_key, Some(first));
        assert_eq!(app.texture.as_ref().map(TextureHandle::id), texture_id);
        assert_eq!(app.shown_window, Some(shown_window));
        assert!(app.display_job.is_none());
    }

    #[test]
    fn submitted_edit_targets_the_prompted_element() {
        use dicom_dictionary_std::tags;

        let dir = tempfile::tempdir().expect("temp dir");
        SliceFixture::new(1).write_to(dir.path().join("a.dcm"));
        let codec: Arc<dyn Codec> = Arc::new(DicomCodec);
        let report = DatasetRegistry::load(dir.path(), Arc::clone(&codec), 1).expect("load");
        let mut app = TagScopeApp::new(AppConfig::from_sources(None, None), codec, report);
        let ctx = egui::Context::default();

        let patient = TagId::from(tags::PATIENT_NAME);
        let study = TagId::from(tags::STUDY_DESCRIPTION);
        app.selected = Some(patient.into());
        app.open_editor();
        assert!(app.dialog.is_open());

        // The selection moves while the dialog is still up.
        app.selected = Some(study.into());
        let response = PromptResponse::Submit {
            path: patient.into(),
            value: "Roe^Richard".to_string(),
            scope: EditScope::Single(0),
        };
        app.handle_prompt_response(response, &ctx);
        for _ in 0..500 {
            app.poll_commit();
            if app.commit_receiver.is_none() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }

        let dataset = app.registry.get(0).expect("slot");
        assert_eq!(dataset.normalized_value(patient).as_deref(), Some("Roe^Richard"));
        assert_eq!(dataset.normalized_value(study).as_deref(), Some("Chest"));
        assert!(
            app.status_line
                .starts_with("Updated (0010,0010) to Roe^Richard in 1 file(s)"),
            "{}",
            app.status_line
        );
        assert!(app.status_line.ends_with("; backed up a.dcm.bak"), "{}", app.status_line);
    }
}
