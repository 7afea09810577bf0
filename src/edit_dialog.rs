use eframe::egui;

use crate::classify::EditScope;
use crate::dataset::Vr;
use crate::edit_prompt::{EditPrompt, PromptResponse, PromptSurface};

/// Modal window that runs one [`EditPrompt`] at a time.
#[derive(Default)]
pub struct EditDialog {
    prompt: Option<EditPrompt>,
    input: String,
    apply_to_all: bool,
    focus_pending: bool,
    result: Option<PromptResponse>,
}

impl PromptSurface for EditDialog {
    fn present(&mut self, prompt: EditPrompt) {
        self.input = prompt.current_value.clone();
        self.apply_to_all = prompt.default_scope().is_bulk();
        self.focus_pending = true;
        self.result = None;
        self.prompt = Some(prompt);
    }

    fn read_result(&mut self) -> Option<PromptResponse> {
        self.result.take()
    }
}

impl EditDialog {
    pub fn is_open(&self) -> bool {
        self.prompt.is_some()
    }

    fn close(&mut self, response: PromptResponse) {
        self.prompt = None;
        self.result = Some(response);
    }

    pub fn show(&mut self, ctx: &egui::Context, warning: egui::Color32, accent: egui::Color32) {
        let Some(prompt) = self.prompt.clone() else {
            return;
        };

        let mut submit = false;
        let mut cancel =
            ctx.input_mut(|input| input.consume_key(egui::Modifiers::NONE, egui::Key::Escape));

        egui::Window::new(prompt.title())
            .id(egui::Id::new("edit-dialog"))
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .min_width(420.0)
            .show(ctx, |ui| {
                ui.horizontal_wrapped(|ui| {
                    ui.label("Current:");
                    ui.monospace(if prompt.current_value.is_empty() {
                        "(empty)"
                    } else {
                        prompt.current_value.as_str()
                    });
                });
                ui.separator();

                if prompt.read_only() {
                    ui.colored_label(warning, format!("Read-only: {}", prompt.single.reason));
                    ui.add_space(6.0);
                    if ui.button("Close").clicked() {
                        cancel = true;
                    }
                    return;
                }

                let multiline = matches!(prompt.vr, Vr::ST | Vr::LT | Vr::UT);
                let editor = if multiline {
                    egui::TextEdit::multiline(&mut self.input).desired_rows(4)
                } else {
                    egui::TextEdit::singleline(&mut self.input)
                };
                let response = ui.add(editor.desired_width(f32::INFINITY));
                if self.focus_pending {
                    response.request_focus();
                    self.focus_pending = false;
                }
                if !multiline
                    && response.lost_focus()
                    && ui.input(|input| input.key_pressed(egui::Key::Enter))
                {
                    submit = true;
                }

                if let Some(bulk) = &prompt.bulk {
                    ui.add_space(4.0);
                    if bulk.classification.editable {
                        ui.checkbox(&mut self.apply_to_all, "Apply to all loaded files");
                        if self.apply_to_all {
                            ui.colored_label(accent, bulk.banner.as_str());
                        }
                    } else {
                        let label = "Apply to all loaded files";
                        let checkbox = egui::Checkbox::new(&mut self.apply_to_all, label);
                        ui.add_enabled(false, checkbox);
                        ui.weak(bulk.classification.reason.to_string());
                    }
                }

                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    if ui.button("Save").clicked() {
                        submit = true;
                    }
                    if ui.button("Cancel").clicked() {
                        cancel = true;
                    }
                });
            });

        if submit {
            self.submit(prompt);
        } else if cancel {
            self.close(PromptResponse::Cancel);
        }
    }

    fn submit(&mut self, prompt: EditPrompt) {
        let bulk_allowed = prompt
            .bulk
            .as_ref()
            .is_some_and(|bulk| bulk.classification.editable);
        let scope = if self.apply_to_all && bulk_allowed {
            EditScope::Bulk
        } else {
            EditScope::Single(prompt.index)
        };
        let value = std::mem::take(&mut self.input);
        self.close(PromptResponse::Submit {
            path: prompt.path,
            value,
            scope,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TagId;
    use crate::fixtures::SliceFixture;
    use crate::registry::DatasetRegistry;

    #[test]
    fn present_prefills_value_and_defaults_to_bulk() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).dataset("a.dcm"),
            SliceFixture::new(2).dataset("b.dcm"),
        ]);
        let prompt =
            EditPrompt::build(&registry, 0, TagId::new(0x0010, 0x0010)).expect("prompt");

        let mut dialog = EditDialog::default();
        dialog.present(prompt);

        assert!(dialog.is_open());
        assert_eq!(dialog.input, "Doe^Jane");
        assert!(dialog.apply_to_all);
        assert_eq!(dialog.read_result(), None);

        dialog.close(PromptResponse::Cancel);
        assert!(!dialog.is_open());
        assert_eq!(dialog.read_result(), Some(PromptResponse::Cancel));
        assert_eq!(dialog.read_result(), None);
    }

    #[test]
    fn submit_answers_for_the_prompted_element() {
        let registry = DatasetRegistry::from_datasets(vec![
            SliceFixture::new(1).dataset("a.dcm"),
            SliceFixture::new(2).dataset("b.dcm"),
        ]);
        let patient_name = TagId::new(0x0010, 0x0010);
        let prompt = EditPrompt::build(&registry, 1, patient_name).expect("prompt");

        let mut dialog = EditDialog::default();
        dialog.present(prompt.clone());
        dialog.input = "Roe^Richard".to_string();
        dialog.apply_to_all = false;
        dialog.submit(prompt);

        assert!(!dialog.is_open());
        assert_eq!(
            dialog.read_result(),
            Some(PromptResponse::Submit {
                path: patient_name.into(),
                value: "Roe^Richard".to_string(),
                scope: EditScope::Single(1),
            })
        );
    }
}
