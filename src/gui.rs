//! GTK front end: a thin driver over [`normalize_batch`] that keeps the
//! window responsive by running the batch on a worker thread and painting
//! row updates from a main-context channel.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use gtk4::prelude::*;
use gtk4::{
    Application, ApplicationWindow, Box as GtkBox, Button, ComboBoxText, Entry, FileChooserAction,
    FileChooserDialog, FileFilter, Label, ListBox, ListBoxRow, Orientation, ProgressBar,
    ResponseType, ScrolledWindow, TextView, gio, glib,
};
use log::warn;

use crate::error::Error;
use crate::prefs::Preferences;
use crate::{
    ChannelMode, DEFAULT_INTEGRATED_LUFS, DEFAULT_LOUDNESS_RANGE_LU, DEFAULT_TRUE_PEAK_DBTP,
    EngineConfig, LoudnessTargets, NormalizationOptions, Progress, normalize_batch, output, probe,
};

const APP_ID: &str = "io.github.absx.LufsNormalize";
const AUDIO_PATTERNS: &[&str] = &["*.mp3", "*.wav", "*.flac", "*.ogg", "*.m4a", "*.aac", "*.opus"];

enum UiMsg {
    Row {
        index: usize,
        text: String,
        fraction: f64,
    },
    Log(String),
    BatchDone,
}

fn prefs_path() -> PathBuf {
    glib::user_config_dir()
        .join("lufs-normalize")
        .join("prefs.json")
}

/// Launches the GTK main loop; returns when the window closes.
pub fn run() -> Result<(), Error> {
    let app = Application::new(Some(APP_ID), Default::default());
    app.connect_activate(build_ui);
    // The CLI already consumed argv; hand GTK an empty command line.
    let _ = app.run_with_args::<&str>(&[]);
    Ok(())
}

fn build_ui(app: &Application) {
    let window = ApplicationWindow::builder()
        .application(app)
        .title("LUFS Normalizer (ffmpeg loudnorm)")
        .default_width(720)
        .default_height(560)
        .build();

    let files: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
    let prefs = Arc::new(Mutex::new(Preferences::load(&prefs_path())));

    let root = GtkBox::new(Orientation::Vertical, 8);
    root.set_margin_top(12);
    root.set_margin_bottom(12);
    root.set_margin_start(12);
    root.set_margin_end(12);

    // Input list, one row per file with its own progress bar
    let list = ListBox::new();
    let list_scroll = ScrolledWindow::new();
    list_scroll.set_child(Some(&list));
    list_scroll.set_min_content_height(160);

    let controls = GtkBox::new(Orientation::Horizontal, 8);
    let add_btn = Button::with_label("Add Files…");
    let clear_btn = Button::with_label("Clear");
    let run_btn = Button::with_label("Run");
    controls.append(&add_btn);
    controls.append(&clear_btn);
    controls.append(&run_btn);

    // Output override, single input only
    let out_box = GtkBox::new(Orientation::Horizontal, 8);
    let out_entry = Entry::new();
    out_entry.set_hexpand(true);
    out_entry.set_sensitive(false);
    let out_btn = Button::with_label("Browse…");
    out_btn.set_sensitive(false);
    out_box.append(&Label::new(Some("Output")));
    out_box.append(&out_entry);
    out_box.append(&out_btn);

    // Loudness targets and encoding parameters
    let params = GtkBox::new(Orientation::Horizontal, 8);
    let i_entry = Entry::new();
    i_entry.set_width_chars(7);
    i_entry.set_text(&DEFAULT_INTEGRATED_LUFS.to_string());
    let tp_entry = Entry::new();
    tp_entry.set_width_chars(7);
    tp_entry.set_text(&DEFAULT_TRUE_PEAK_DBTP.to_string());
    let lra_entry = Entry::new();
    lra_entry.set_width_chars(7);
    lra_entry.set_text(&DEFAULT_LOUDNESS_RANGE_LU.to_string());
    let bitrate_entry = Entry::new();
    bitrate_entry.set_width_chars(8);
    let channels_combo = ComboBoxText::new();
    for mode in [ChannelMode::Keep, ChannelMode::Mono, ChannelMode::Stereo] {
        let id = mode.to_string();
        channels_combo.append(Some(id.as_str()), &id);
    }
    channels_combo.set_active_id(Some("keep"));

    params.append(&Label::new(Some("I (LUFS)")));
    params.append(&i_entry);
    params.append(&Label::new(Some("TP (dBTP)")));
    params.append(&tp_entry);
    params.append(&Label::new(Some("LRA (LU)")));
    params.append(&lra_entry);
    params.append(&Label::new(Some("Bitrate")));
    params.append(&bitrate_entry);
    params.append(&Label::new(Some("Channels")));
    params.append(&channels_combo);

    // Log pane
    let log_view = TextView::new();
    log_view.set_editable(false);
    log_view.set_monospace(true);
    let log_scroll = ScrolledWindow::new();
    log_scroll.set_child(Some(&log_view));
    log_scroll.set_min_content_height(120);
    log_scroll.set_vexpand(true);

    root.append(&controls);
    root.append(&list_scroll);
    root.append(&out_box);
    root.append(&params);
    root.append(&log_scroll);

    // Handler: add files
    {
        let window = window.clone();
        let list = list.clone();
        let files = Arc::clone(&files);
        let prefs = Arc::clone(&prefs);
        let out_entry = out_entry.clone();
        let out_btn = out_btn.clone();
        let bitrate_entry = bitrate_entry.clone();
        add_btn.connect_clicked(move |_| {
            let dlg = FileChooserDialog::new(
                Some("Select audio files"),
                Some(&window),
                FileChooserAction::Open,
                &[
                    ("Cancel", ResponseType::Cancel),
                    ("Select", ResponseType::Accept),
                ],
            );
            dlg.set_modal(true);
            dlg.set_select_multiple(true);

            let filter = FileFilter::new();
            for pattern in AUDIO_PATTERNS {
                filter.add_pattern(pattern);
            }
            filter.set_name(Some("Audio files"));
            dlg.add_filter(&filter);

            if let Some(dir) = prefs.lock().unwrap().last_folder.clone() {
                let _ = dlg.set_current_folder(Some(&gio::File::for_path(dir)));
            }

            dlg.connect_response({
                let list = list.clone();
                let files = Arc::clone(&files);
                let prefs = Arc::clone(&prefs);
                let out_entry = out_entry.clone();
                let out_btn = out_btn.clone();
                let bitrate_entry = bitrate_entry.clone();
                move |dlg, resp| {
                    if resp == ResponseType::Accept {
                        let model = dlg.files();
                        let mut picked: Vec<PathBuf> = Vec::new();
                        for i in 0..model.n_items() {
                            if let Some(obj) = model.item(i) {
                                if let Ok(file) = obj.downcast::<gio::File>() {
                                    if let Some(path) = file.path() {
                                        picked.push(path);
                                    }
                                }
                            }
                        }
                        if !picked.is_empty() {
                            remember_folder(&prefs, picked[0].parent());
                            let mut files = files.lock().unwrap();
                            for path in picked {
                                if !files.contains(&path) {
                                    append_row(&list, &path);
                                    files.push(path);
                                }
                            }
                            let single = files.len() == 1;
                            out_entry.set_sensitive(single);
                            out_btn.set_sensitive(single);
                            if single {
                                // Prefill the bitrate field from the source
                                if let Ok(engine) = EngineConfig::locate() {
                                    if let Some(bitrate) =
                                        probe::probe_source(&engine, &files[0]).bitrate
                                    {
                                        bitrate_entry.set_text(&bitrate);
                                    }
                                }
                            }
                        }
                    }
                    dlg.close();
                }
            });
            dlg.show();
        });
    }

    // Handler: clear the list
    {
        let files = Arc::clone(&files);
        let list = list.clone();
        let out_entry = out_entry.clone();
        let out_btn = out_btn.clone();
        clear_btn.connect_clicked(move |_| {
            files.lock().unwrap().clear();
            clear_rows(&list);
            out_entry.set_text("");
            out_entry.set_sensitive(false);
            out_btn.set_sensitive(false);
        });
    }

    // Handler: browse for the single-input output path
    {
        let window = window.clone();
        let files = Arc::clone(&files);
        let prefs = Arc::clone(&prefs);
        let out_entry = out_entry.clone();
        let i_entry = i_entry.clone();
        out_btn.connect_clicked(move |_| {
            let suggested = {
                let files = files.lock().unwrap();
                if files.len() != 1 {
                    return;
                }
                let target = i_entry
                    .text()
                    .trim()
                    .parse::<f64>()
                    .unwrap_or(DEFAULT_INTEGRATED_LUFS);
                output::default_output_path(&files[0], target)
            };
            let dlg = FileChooserDialog::new(
                Some("Select output file"),
                Some(&window),
                FileChooserAction::Save,
                &[
                    ("Cancel", ResponseType::Cancel),
                    ("Save", ResponseType::Accept),
                ],
            );
            dlg.set_modal(true);
            if let Some(name) = suggested.file_name() {
                dlg.set_current_name(&name.to_string_lossy());
            }
            if let Some(dir) = prefs.lock().unwrap().last_folder.clone() {
                let _ = dlg.set_current_folder(Some(&gio::File::for_path(dir)));
            }
            dlg.connect_response({
                let out_entry = out_entry.clone();
                let prefs = Arc::clone(&prefs);
                move |dlg, resp| {
                    if resp == ResponseType::Accept {
                        if let Some(path) = dlg.file().and_then(|f| f.path()) {
                            out_entry.set_text(&path.display().to_string());
                            remember_folder(&prefs, path.parent());
                        }
                    }
                    dlg.close();
                }
            });
            dlg.show();
        });
    }

    // Handler: run the batch on a worker thread
    {
        let files = Arc::clone(&files);
        let list = list.clone();
        let log_view = log_view.clone();
        let add_btn = add_btn.clone();
        let clear_btn = clear_btn.clone();
        let out_entry = out_entry.clone();
        let i_entry = i_entry.clone();
        let tp_entry = tp_entry.clone();
        let lra_entry = lra_entry.clone();
        let bitrate_entry = bitrate_entry.clone();
        let channels_combo = channels_combo.clone();
        run_btn.connect_clicked(move |btn| {
            let inputs = files.lock().unwrap().clone();
            if inputs.is_empty() {
                append_log(&log_view, "Add one or more input files first.");
                return;
            }
            let Ok(integrated) = i_entry.text().trim().parse::<f64>() else {
                append_log(&log_view, "I must be a number.");
                return;
            };
            let Ok(true_peak) = tp_entry.text().trim().parse::<f64>() else {
                append_log(&log_view, "TP must be a number.");
                return;
            };
            let Ok(loudness_range) = lra_entry.text().trim().parse::<f64>() else {
                append_log(&log_view, "LRA must be a number.");
                return;
            };
            let bitrate_text = bitrate_entry.text().trim().to_string();
            let bitrate = (!bitrate_text.is_empty()).then_some(bitrate_text);
            let channels = match channels_combo.active_id().as_deref() {
                Some("mono") => ChannelMode::Mono,
                Some("stereo") => ChannelMode::Stereo,
                _ => ChannelMode::Keep,
            };
            let output = if inputs.len() == 1 {
                let text = out_entry.text().trim().to_string();
                (!text.is_empty()).then(|| PathBuf::from(text))
            } else {
                None
            };
            let engine = match EngineConfig::locate() {
                Ok(engine) => engine,
                Err(e) => {
                    append_log(&log_view, &e.to_string());
                    return;
                }
            };
            let options = NormalizationOptions {
                targets: LoudnessTargets {
                    integrated,
                    true_peak,
                    loudness_range,
                },
                output,
                bitrate,
                channels,
            };

            let bars = collect_progress_bars(&list);
            for bar in &bars {
                bar.set_fraction(0.0);
                bar.set_text(Some("Waiting"));
            }

            btn.set_sensitive(false);
            add_btn.set_sensitive(false);
            clear_btn.set_sensitive(false);

            let (tx, rx) = glib::MainContext::channel::<UiMsg>(glib::Priority::DEFAULT);

            // The worker owns the whole batch; the main loop only paints.
            let worker_tx = tx.clone();
            thread::spawn(move || {
                let progress_tx = worker_tx.clone();
                let outcome = normalize_batch(&inputs, &options, &engine, move |index, progress| {
                    let (text, fraction) = match progress {
                        Progress::Indeterminate => ("Processing…".to_string(), -1.0),
                        Progress::Fraction(frac) => (format!("{:.0}%", frac * 100.0), frac),
                        Progress::Done => ("Done".to_string(), 1.0),
                    };
                    let _ = progress_tx.send(UiMsg::Row {
                        index,
                        text,
                        fraction,
                    });
                });
                match outcome {
                    Ok(results) => {
                        for (index, result) in results.iter().enumerate() {
                            match (&result.output, &result.error) {
                                (Some(output), None) => {
                                    let _ = worker_tx.send(UiMsg::Row {
                                        index,
                                        text: "Done".into(),
                                        fraction: 1.0,
                                    });
                                    let _ = worker_tx.send(UiMsg::Log(format!(
                                        "OK: {} -> {}",
                                        result.input.display(),
                                        output.display()
                                    )));
                                }
                                (_, Some(error)) => {
                                    let _ = worker_tx.send(UiMsg::Row {
                                        index,
                                        text: "Failed".into(),
                                        fraction: 0.0,
                                    });
                                    let _ = worker_tx.send(UiMsg::Log(format!(
                                        "FAILED: {}: {}",
                                        result.input.display(),
                                        error
                                    )));
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = worker_tx.send(UiMsg::Log(format!("Batch rejected: {e}")));
                    }
                }
                let _ = worker_tx.send(UiMsg::BatchDone);
            });

            // Row updates plus one pulse timer per bar while its duration is
            // unknown.
            let timers: Rc<RefCell<Vec<Option<glib::SourceId>>>> =
                Rc::new(RefCell::new((0..bars.len()).map(|_| None).collect()));
            let run_btn = btn.clone();
            let add_btn = add_btn.clone();
            let clear_btn = clear_btn.clone();
            let log_view = log_view.clone();
            rx.attach(None, move |msg| {
                match msg {
                    UiMsg::Row {
                        index,
                        text,
                        fraction,
                    } => {
                        if let Some(bar) = bars.get(index) {
                            let mut timers = timers.borrow_mut();
                            if fraction < 0.0 {
                                bar.set_text(Some(&text));
                                bar.set_pulse_step(0.02);
                                if timers.get(index).and_then(|t| t.as_ref()).is_none() {
                                    let bar = bar.clone();
                                    let source = glib::timeout_add_local(
                                        Duration::from_millis(100),
                                        move || {
                                            bar.pulse();
                                            glib::ControlFlow::Continue
                                        },
                                    );
                                    if let Some(slot) = timers.get_mut(index) {
                                        *slot = Some(source);
                                    }
                                }
                            } else {
                                if let Some(slot) = timers.get_mut(index) {
                                    if let Some(source) = slot.take() {
                                        source.remove();
                                    }
                                }
                                bar.set_fraction(fraction.min(1.0));
                                bar.set_text(Some(&text));
                            }
                        }
                    }
                    UiMsg::Log(line) => append_log(&log_view, &line),
                    UiMsg::BatchDone => {
                        run_btn.set_sensitive(true);
                        add_btn.set_sensitive(true);
                        clear_btn.set_sensitive(true);
                    }
                }
                glib::ControlFlow::Continue
            });
        });
    }

    window.set_child(Some(&root));
    window.show();
}

fn append_row(list: &ListBox, path: &Path) {
    let row = ListBoxRow::new();
    let hbox = GtkBox::new(Orientation::Horizontal, 8);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let label = Label::new(Some(&name));
    label.set_xalign(0.0);
    let bar = ProgressBar::new();
    bar.set_hexpand(true);
    bar.set_valign(gtk4::Align::Center);
    bar.set_show_text(true);
    bar.set_text(Some("Waiting"));
    hbox.append(&label);
    hbox.append(&bar);
    row.set_child(Some(&hbox));
    list.append(&row);
}

fn clear_rows(list: &ListBox) {
    while let Some(row) = list.first_child() {
        list.remove(&row);
    }
}

fn collect_progress_bars(list: &ListBox) -> Vec<ProgressBar> {
    let mut bars = Vec::new();
    let mut child = list.first_child();
    while let Some(widget) = child {
        if let Ok(row) = widget.clone().downcast::<ListBoxRow>() {
            if let Some(hbox) = row.child().and_then(|c| c.downcast::<GtkBox>().ok()) {
                let mut inner = hbox.first_child();
                while let Some(candidate) = inner {
                    if let Ok(bar) = candidate.clone().downcast::<ProgressBar>() {
                        bars.push(bar);
                        break;
                    }
                    inner = candidate.next_sibling();
                }
            }
        }
        child = widget.next_sibling();
    }
    bars
}

fn append_log(view: &TextView, line: &str) {
    let buffer = view.buffer();
    let mut end = buffer.end_iter();
    buffer.insert(&mut end, line);
    buffer.insert(&mut end, "\n");
}

fn remember_folder(prefs: &Arc<Mutex<Preferences>>, dir: Option<&Path>) {
    if let Some(dir) = dir {
        let mut prefs = prefs.lock().unwrap();
        prefs.last_folder = Some(dir.to_path_buf());
        if let Err(e) = prefs.store(&prefs_path()) {
            warn!("failed to save preferences: {e}");
        }
    }
}
