use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use kb_engine::{
    evaluate_page, handle_request, page_fingerprint, BackgroundPackager, BatchReport, Debouncer,
    EngineConfig, HarvestSettings, Harvester, Packager, TriggerPlacement, ZipPackager,
};
use kb_logging::{kb_info, kb_warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::source::PageSource;

pub struct WatchOptions {
    pub poll_ms: u64,
    pub max_polls: Option<u64>,
    pub auto_export: bool,
}

fn build_harvester(settings: HarvestSettings, in_process: bool) -> Result<Harvester> {
    let output = settings.output_dir.clone();
    let packager: Arc<dyn Packager> = if in_process {
        Arc::new(ZipPackager::new(output))
    } else {
        Arc::new(BackgroundPackager::spawn(ZipPackager::new(output))?)
    };
    Ok(Harvester::new(EngineConfig::new(settings), packager))
}

pub async fn export(settings: HarvestSettings, source: &PageSource, in_process: bool) -> Result<()> {
    let page = source.open()?;
    let harvester = build_harvester(settings, in_process)?;
    let Some(report) = harvester.run(page.as_ref()).await else {
        bail!("an export is already running");
    };
    println!("{}", describe(&report));
    match report.failure() {
        Some(kind) => bail!("{kind}"),
        None => Ok(()),
    }
}

/// One JSON request per stdin line, one JSON response per stdout line.
pub async fn listen(settings: HarvestSettings, source: &PageSource, in_process: bool) -> Result<()> {
    let page = source.open()?;
    let harvester = build_harvester(settings, in_process)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    kb_info!("Listening for host requests on stdin");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_request(&harvester, page.as_ref(), &line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    kb_info!("Host closed the request stream");
    Ok(())
}

pub async fn watch(settings: HarvestSettings, source: &PageSource, options: WatchOptions) -> Result<()> {
    let page = source.open()?;
    let rules = settings.detection.clone();
    let harvester = if options.auto_export {
        Some(build_harvester(settings, false)?)
    } else {
        None
    };
    let mut debouncer = Debouncer::new(Duration::from_millis(rules.debounce_ms));
    let mut ticker = tokio::time::interval(Duration::from_millis(options.poll_ms.max(1)));
    let mut last_fingerprint: Option<String> = None;
    let mut exported = false;
    let mut polls: u64 = 0;

    loop {
        ticker.tick().await;
        let markup = page.content().await?;
        let now = Instant::now();
        let fingerprint = page_fingerprint(&markup);
        if last_fingerprint.as_deref() != Some(fingerprint.as_str()) {
            debouncer.signal(now);
            last_fingerprint = Some(fingerprint);
        }

        if debouncer.poll(now) {
            let url = page.url().await?;
            match evaluate_page(&url, &markup, &rules) {
                Some(placement) => {
                    println!("knowledge page: trigger {}", describe_placement(&placement));
                    if let (Some(harvester), false) = (&harvester, exported) {
                        exported = true;
                        match harvester.run(page.as_ref()).await {
                            Some(report) => println!("{}", describe(&report)),
                            None => kb_warn!("Export already running; detection ignored"),
                        }
                    }
                }
                None => println!("not a knowledge page"),
            }
        }

        polls += 1;
        if options.max_polls.is_some_and(|max| polls >= max) {
            return Ok(());
        }
    }
}

fn describe_placement(placement: &TriggerPlacement) -> String {
    match placement {
        TriggerPlacement::Adjacent(anchor) => format!("next to {anchor}"),
        TriggerPlacement::Floating => "floating".to_string(),
    }
}

fn describe(report: &BatchReport) -> String {
    let stats = report.view.stats;
    let mut lines = vec![report
        .view
        .last_summary
        .clone()
        .unwrap_or_else(|| format!("Batch ended in {:?}", report.view.phase))];
    if stats.failed_items + stats.dropped_blank + stats.interaction_failures > 0 {
        lines.push(format!(
            "  skipped {} failed and {} blank documents; {} interaction fallbacks",
            stats.failed_items, stats.dropped_blank, stats.interaction_failures
        ));
    }
    if stats.used_local_fallback {
        lines.push("  packaged locally: background packager unreachable".to_string());
    }
    for document in &report.documents {
        lines.push(format!("  {}", document.filename()));
    }
    lines.join("\n")
}
