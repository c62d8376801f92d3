use std::time::Duration;

use adapters::{BrowserDriver, ContextHandle, DriverError, ElementHandle};
use chrono::Utc;
use corelib::{
    AuctionSnapshot, AuxiliaryMarker, FieldKey, FieldSpec, FieldUpdate, PostProcess,
    SelectorRule,
};
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::config::MonitorConfig;

/// Probe budgets for one extraction pass.
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    pub probe_timeout: Duration,
    pub auxiliary_probe_timeout: Duration,
    pub candidate_budget: Duration,
    pub max_elements: usize,
}

impl From<&MonitorConfig> for ExtractOptions {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            probe_timeout: cfg.probe_timeout,
            auxiliary_probe_timeout: cfg.auxiliary_probe_timeout,
            candidate_budget: cfg.candidate_budget,
            max_elements: cfg.max_elements_per_candidate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub snapshot: AuctionSnapshot,
    /// Fields left at their sentinel.
    pub unavailable: Vec<FieldKey>,
}

/// Reads every field of `fields` from `context` into a complete snapshot.
///
/// Fields are probed concurrently. A field whose candidates all miss keeps
/// its sentinel. Only errors that invalidate the whole pass (context gone,
/// browser closed) are returned.
#[instrument(skip_all, fields(context = %context.id))]
pub async fn extract<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    fields: &[FieldSpec],
    opts: ExtractOptions,
    auction_id: &str,
) -> Result<Extraction, DriverError> {
    let results = join_all(
        fields
            .iter()
            .map(|spec| async move { (spec.key, extract_field(driver, context, spec, opts).await) }),
    )
    .await;

    let mut update = FieldUpdate::default();
    let mut unavailable = Vec::new();
    let mut failure: Option<DriverError> = None;

    for (key, result) in results {
        match result {
            Ok(Some(value)) => update.set(key, value),
            Ok(None) => unavailable.push(key),
            Err(e) => {
                // A closed browser outranks a lost context.
                if failure.as_ref().is_none_or(|f| !f.is_fatal()) {
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    let now = Utc::now();
    let mut snapshot = AuctionSnapshot::sentinel(auction_id, now);
    snapshot.merge(&update, now);

    if !unavailable.is_empty() {
        debug!(missing = ?unavailable, "fields left at sentinel");
    }

    Ok(Extraction {
        snapshot,
        unavailable,
    })
}

/// Tries the candidates of one field strictly in order, then the auxiliary
/// marker if the field has one.
pub async fn extract_field<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    spec: &FieldSpec,
    opts: ExtractOptions,
) -> Result<Option<String>, DriverError> {
    for rule in &spec.candidates {
        let probe = probe_candidate(driver, context, rule, spec.post, opts);

        match timeout(opts.candidate_budget, probe).await {
            Ok(Ok(Some(value))) => {
                trace!(field = %spec.key, selector = %rule.selector, "candidate matched");
                return Ok(Some(value));
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) if e.interrupts_cycle() => return Err(e),
            Ok(Err(e)) => {
                trace!(field = %spec.key, selector = %rule.selector, error = %e, "candidate failed")
            }
            Err(_) => {
                debug!(field = %spec.key, selector = %rule.selector, "candidate budget exhausted")
            }
        }
    }

    let Some(marker) = &spec.auxiliary else {
        return Ok(None);
    };

    match timeout(
        opts.candidate_budget,
        probe_auxiliary(driver, context, marker, spec.post, opts),
    )
    .await
    {
        Ok(Ok(found)) => Ok(found),
        Ok(Err(e)) if e.interrupts_cycle() => Err(e),
        Ok(Err(_)) | Err(_) => Ok(None),
    }
}

async fn probe_candidate<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    rule: &SelectorRule,
    post: PostProcess,
    opts: ExtractOptions,
) -> Result<Option<String>, DriverError> {
    let elements = driver.locate(context, &rule.selector).await?;

    for element in elements.iter().take(opts.max_elements) {
        if !driver.is_visible(element, opts.probe_timeout).await? {
            continue;
        }

        let Some(raw) = read_value(driver, element, rule.attribute.as_deref()).await? else {
            continue;
        };

        let text = raw.trim();
        if text.is_empty() || !rule.accepts(text) {
            continue;
        }

        if let Some(value) = post.apply(text) {
            return Ok(Some(value));
        }
    }

    Ok(None)
}

/// Attribute when requested and non-blank, element text otherwise.
async fn read_value<D: BrowserDriver + ?Sized>(
    driver: &D,
    element: &ElementHandle,
    attribute: Option<&str>,
) -> Result<Option<String>, DriverError> {
    if let Some(name) = attribute {
        if let Some(value) = driver.get_attribute(element, name).await? {
            if !value.trim().is_empty() {
                return Ok(Some(value));
            }
        }
    }

    driver.text_content(element).await
}

async fn probe_auxiliary<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    marker: &AuxiliaryMarker,
    post: PostProcess,
    opts: ExtractOptions,
) -> Result<Option<String>, DriverError> {
    let markers = driver.locate(context, &marker.marker).await?;

    'markers: for element in markers.iter().take(opts.max_elements) {
        for attr in &marker.required_attributes {
            let present = driver
                .get_attribute(element, attr)
                .await?
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                continue 'markers;
            }
        }

        let Some(container) = driver.closest(element, &marker.container).await? else {
            continue;
        };

        if !driver
            .is_visible(&container, opts.auxiliary_probe_timeout)
            .await?
        {
            continue;
        }

        let Some(text) = driver.text_content(&container).await? else {
            continue;
        };

        if !text.to_lowercase().contains(&marker.keyword) {
            continue;
        }

        if let Some(value) = post.apply(&text) {
            return Ok(Some(value));
        }
    }

    Ok(None)
}
