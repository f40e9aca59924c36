use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;
use serde::Serialize;

use super::command::{Cli, InfoArgs, Transport};
use crate::input::InputReader;
use mpegh::callbacks::{ConfigMode, FramePayload, TransportCallbacks};
use mpegh::process::params::{TransportParam, TransportType};
use mpegh::process::sync::{AccessUnitInfo, AccessUnitKind, TransportDecoder};
use mpegh::process::{MAX_SUBSTREAMS, SubstreamIndex};
use mpegh::structs::asi::AudioSceneInfo;
use mpegh::structs::config::{AudioSpecificConfig, GroupLayout};

const CHUNK_SIZE: usize = 64 * 1024;

pub fn cmd_info(args: &InfoArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Analyzing MHAS stream: {}", args.input.display());

    let mut input_reader = InputReader::new(&args.input)?;
    let transport = match args.transport {
        Transport::Mhas => TransportType::Mhas,
        Transport::Raw => TransportType::MhasRaw,
    };
    let mut decoder = TransportDecoder::new(transport, Collector::default()).with_scene_info();
    configure(&mut decoder, args, cli)?;

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi, input_reader.size())?),
        None => None,
    };

    let mut stats = Stats::default();
    input_reader.process_chunks(CHUNK_SIZE, |chunk| {
        stats.total_bytes += chunk.len() as u64;

        let mut data = chunk;
        loop {
            let rest = decoder.fill_data(data);
            data = &data[data.len() - rest..];
            drain(&mut decoder, &mut stats, cli.strict)?;
            if data.is_empty() {
                break;
            }
        }

        if let Some(ref pb) = pb {
            pb.set_position(stats.total_bytes);
            pb.set_message(format!("{} access units", stats.access_units));
        }

        Ok(true)
    })?;

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    if decoder.buffered() > 0 {
        log::warn!("{} trailing bytes do not form an access unit", decoder.buffered());
    }

    let summary = StreamSummary::new(&decoder, &stats);
    if summary.substreams.is_empty() {
        println!("No MPEG-H configuration found in the file.");
        println!("This doesn't appear to be a valid MHAS stream.");
        return Ok(());
    }

    if args.yaml {
        print!("{}", serde_yaml_ng::to_string(&summary)?);
    } else {
        display_summary(&summary);
    }

    Ok(())
}

fn configure(decoder: &mut TransportDecoder<Collector>, args: &InfoArgs, cli: &Cli) -> Result<()> {
    // Configure fail level based on strict mode
    let fail_level = if cli.strict {
        Level::Warn
    } else {
        Level::Error
    };
    decoder.set_param(TransportParam::FailLevel(fail_level))?;

    if let Some(bitrate) = args.bitrate {
        decoder.set_param(TransportParam::AverageBitrate(bitrate))?;
    }
    if let Some(layout) = args.target_layout {
        decoder.set_param(TransportParam::TargetLayout(layout))?;
    }
    if args.force_config_change {
        decoder.set_param(TransportParam::ForceConfigChange)?;
    }

    Ok(())
}

fn create_progress_bar(multi: &MultiProgress, total_bytes: Option<u64>) -> Result<ProgressBar> {
    let pb = if let Some(total) = total_bytes {
        let pb = multi.add(ProgressBar::new(total));
        pb.set_style(ProgressStyle::with_template(
            "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%)\n{msg} | elapsed: {elapsed_precise}",
        )?);
        pb
    } else {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} {bytes}\n{msg} | elapsed: {elapsed_precise}",
        )?);
        pb
    };

    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("Analyzing access units...");
    Ok(pb)
}

/// Reads access units until more input is needed.
fn drain(decoder: &mut TransportDecoder<Collector>, stats: &mut Stats, strict: bool) -> Result<()> {
    loop {
        match decoder.read_access_unit() {
            Ok(info) => stats.record(&info),
            Err(e) if e.is_not_enough_bits() => return Ok(()),
            Err(e) if e.code.is_fatal() || strict => return Err(e.into()),
            Err(e) => {
                stats.errors += 1;
                log::warn!("Access unit {}: {e}", stats.access_units);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    total_bytes: u64,
    access_units: u64,
    flushes: u64,
    config_changes: u64,
    lost_access_units: u64,
    errors: u64,
}

impl Stats {
    fn record(&mut self, info: &AccessUnitInfo) {
        match info.kind {
            AccessUnitKind::Frame => self.access_units += 1,
            AccessUnitKind::Flush => self.flushes += 1,
        }
        if info.config_changed {
            self.config_changes += 1;
        }
        self.lost_access_units += info.lost_access_units as u64;
    }
}

/// Counts what the transport layer hands to the audio decoder.
#[derive(Debug, Default)]
struct Collector {
    frames: [u64; MAX_SUBSTREAMS],
    channels: [usize; MAX_SUBSTREAMS],
    reallocations: u64,
    truncations: u64,
    markers: u64,
}

impl TransportCallbacks for Collector {
    fn update_config(
        &mut self,
        config: &AudioSpecificConfig,
        mode: ConfigMode,
        substream: SubstreamIndex,
    ) -> Result<bool> {
        let channels = config.num_channels();
        let changed = self.channels[substream.index()] != channels;

        if mode == ConfigMode::Alloc {
            self.channels[substream.index()] = channels;
        }

        Ok(changed)
    }

    fn free_mem(&mut self, _config: &AudioSpecificConfig, substream: SubstreamIndex) -> Result<()> {
        log::debug!("{substream}: reallocating");
        self.reallocations += 1;
        Ok(())
    }

    fn decode_frame(&mut self, frame: &FramePayload) -> Result<()> {
        self.frames[frame.substream.index()] += 1;
        Ok(())
    }

    fn truncation(&mut self, samples: u16, from_begin: bool, substream: SubstreamIndex) -> Result<()> {
        log::info!(
            "{substream}: {samples} samples truncated at the {}",
            if from_begin { "beginning" } else { "end" }
        );
        self.truncations += 1;
        Ok(())
    }

    fn marker(&mut self, _data: &[u8], _label: u32) -> Result<()> {
        self.markers += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct StreamSummary {
    substreams: Vec<SubstreamSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scene: Option<SceneSummary>,
    access_units: u64,
    flushes: u64,
    config_changes: u64,
    reallocations: u64,
    truncations: u64,
    markers: u64,
    total_bytes: u64,
    skipped_bytes: u64,
    lost_access_units: u64,
    errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    average_kbps: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SubstreamSummary {
    index: usize,
    label: Option<u32>,
    profile_level: String,
    sampling_frequency: u32,
    frame_length: usize,
    reference_layout: Option<u8>,
    speakers: usize,
    signal_groups: Vec<SignalGroupSummary>,
    elements: Vec<String>,
    config_extensions: Vec<String>,
    frames: u64,
}

#[derive(Debug, Serialize)]
struct SignalGroupSummary {
    group_type: String,
    signals: usize,
    /// CICP index of an explicit layout, `None` for the reference layout.
    #[serde(skip_serializing_if = "Option::is_none")]
    layout: Option<u8>,
}

#[derive(Debug, Serialize)]
struct SceneSummary {
    scene_id: Option<u8>,
    groups: usize,
    switch_groups: usize,
    presets: usize,
    descriptions: Vec<String>,
}

impl StreamSummary {
    fn new(decoder: &TransportDecoder<Collector>, stats: &Stats) -> Self {
        let collector = decoder.callbacks();

        let substreams = SubstreamIndex::all()
            .filter_map(|substream| {
                let config = decoder.config(substream)?;
                Some(SubstreamSummary::new(
                    substream,
                    decoder.label(substream),
                    config,
                    collector.frames[substream.index()],
                ))
            })
            .collect::<Vec<_>>();

        let scene = decoder
            .scene_info()
            .filter(|asi| asi.substreams.iter().any(|s| s.received))
            .map(SceneSummary::new);

        let duration_secs = decoder.config(SubstreamIndex::MAIN).and_then(|config| {
            let samples = collector.frames[0] * config.output_frame_length as u64;
            (config.sampling_frequency > 0)
                .then(|| samples as f64 / config.sampling_frequency as f64)
        });

        Self {
            substreams,
            scene,
            access_units: stats.access_units,
            flushes: stats.flushes,
            config_changes: stats.config_changes,
            reallocations: collector.reallocations,
            truncations: collector.truncations,
            markers: collector.markers,
            total_bytes: stats.total_bytes,
            skipped_bytes: decoder.skipped_bytes(),
            lost_access_units: stats.lost_access_units,
            errors: stats.errors,
            duration: duration_secs.map(time_str),
            average_kbps: duration_secs
                .filter(|&secs| secs > 0.0)
                .map(|secs| (stats.total_bytes as f64 * 8.0) / (secs * 1000.0)),
        }
    }
}

impl SubstreamSummary {
    fn new(
        substream: SubstreamIndex,
        label: Option<u32>,
        config: &AudioSpecificConfig,
        frames: u64,
    ) -> Self {
        let signal_groups = config
            .signals
            .groups
            .iter()
            .map(|group| SignalGroupSummary {
                group_type: format!("{:?}", group.group_type),
                signals: group.num_signals,
                layout: match &group.layout {
                    Some(GroupLayout::Explicit(layout)) => layout.cicp_layout_index,
                    _ => None,
                },
            })
            .collect();

        let config_extensions = config
            .config_extension
            .iter()
            .flat_map(|ext| ext.entries.iter())
            .map(|entry| format!("{:?}", entry.ext_type))
            .collect();

        Self {
            index: substream.index(),
            label,
            profile_level: format!("{:#04X}", config.profile_level_indication),
            sampling_frequency: config.sampling_frequency,
            frame_length: config.output_frame_length,
            reference_layout: config.reference_layout.cicp_layout_index,
            speakers: config.reference_layout.speakers.len(),
            signal_groups,
            elements: config
                .decoder_config
                .elements
                .iter()
                .map(|element| format!("{:?}", element.element_type()))
                .collect(),
            config_extensions,
            frames,
        }
    }
}

impl SceneSummary {
    fn new(asi: &AudioSceneInfo) -> Self {
        let descriptions = asi
            .groups
            .iter()
            .filter_map(|group| {
                let text = asi.group_description(group.id)?;
                Some(format!("{}: {}", group.id, String::from_utf8_lossy(text)))
            })
            .collect();

        Self {
            scene_id: asi.scene_id,
            groups: asi.groups.len(),
            switch_groups: asi.switch_groups.len(),
            presets: asi.presets.len(),
            descriptions,
        }
    }
}

fn display_summary(summary: &StreamSummary) {
    println!();
    println!("MPEG-H Stream Information");
    println!("=========================");
    println!();

    for substream in &summary.substreams {
        display_substream(substream);
    }

    if let Some(scene) = &summary.scene {
        display_scene(scene);
    }

    println!("Analysis Summary");
    println!("  Access units              {}", summary.access_units);
    println!("  Configuration changes     {}", summary.config_changes);
    println!("  Flushed access units      {}", summary.flushes);
    if summary.truncations > 0 {
        println!("  Truncations               {}", summary.truncations);
    }
    if summary.markers > 0 {
        println!("  Markers                   {}", summary.markers);
    }

    let size_mb = summary.total_bytes as f64 / 1_000_000.0;
    println!(
        "  Size                      {size_mb:.2} MB ({} bytes)",
        summary.total_bytes
    );
    if let Some(duration) = &summary.duration {
        println!("  Duration                  {duration}");
    }
    if let Some(kbps) = summary.average_kbps {
        println!("  Average data rate         {kbps:.1} kbps");
    }
    if summary.skipped_bytes > 0 || summary.errors > 0 {
        println!("  Skipped bytes             {}", summary.skipped_bytes);
        println!("  Lost access units         {}", summary.lost_access_units);
        println!("  Errors                    {}", summary.errors);
    }

    println!();
}

fn display_substream(info: &SubstreamSummary) {
    match info.label {
        Some(label) => println!("Substream {} (label {label})", info.index),
        None => println!("Substream {}", info.index),
    }

    println!("  Profile/level             {}", info.profile_level);
    println!("  Sampling rate             {} Hz", info.sampling_frequency);
    println!("  Frame length              {} samples", info.frame_length);

    match info.reference_layout {
        Some(index) => println!(
            "  Reference layout          CICP {index} ({} speakers)",
            info.speakers
        ),
        None => println!("  Reference layout          {} speakers", info.speakers),
    }

    for group in &info.signal_groups {
        println!(
            "  Signal group              {} ({} signals)",
            group.group_type, group.signals
        );
    }

    println!("  Elements                  {}", info.elements.join(", "));
    if !info.config_extensions.is_empty() {
        println!(
            "  Config extensions         {}",
            info.config_extensions.join(", ")
        );
    }
    println!("  Frames                    {}", info.frames);
    println!();
}

fn display_scene(scene: &SceneSummary) {
    println!("Audio Scene Information");
    if let Some(id) = scene.scene_id {
        println!("  Scene ID                  {id}");
    }
    println!("  Groups                    {}", scene.groups);
    println!("  Switch groups             {}", scene.switch_groups);
    println!("  Presets                   {}", scene.presets);
    for description in &scene.descriptions {
        println!("  Group description         {description}");
    }
    println!();
}

fn time_str(sec: f64) -> String {
    let ms = sec * 1000f64;
    let hours = (ms / 3600000f64) as u64;
    let minutes = ((ms % 3600000f64) / 60000f64) as u64;
    let seconds = ((ms % 60000f64) / 1000f64) as u64;
    let milliseconds = (ms % 1000f64) as u64;

    format!(
        "{hours:0width$}:{minutes:02}:{seconds:02}.{milliseconds:03}",
        width = if hours >= 100 { 0 } else { 2 }
    )
}
