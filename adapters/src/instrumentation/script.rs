use corelib::FieldSpec;
use serde::Serialize;

/// Prefix of change lines emitted by the page observer.
pub const CHANGE_TAG: &str = "CHANGE:";

/// Prefix of observer lifecycle notices.
pub const NOTICE_TAG: &str = "OBSERVER:";

/// Page global holding every observer installed by this engine.
pub const OBSERVER_REGISTRY: &str = "__auctionObservers";

/// What the injected observer watches and how it derives field values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverPlan {
    pub root: String,
    pub attributes: Vec<String>,
    pub fields: Vec<FieldSpec>,
    pub max_elements: usize,
}

const OBSERVER_TEMPLATE: &str = r#"(() => {
  const plan = __PLAN__;
  const registry = (window.__REGISTRY__ = window.__REGISTRY__ || []);
  const root = document.querySelector(plan.root);
  if (!root) {
    console.log('__NOTICE__not-set-up ' + plan.root);
    return { installed: false, reason: 'root-missing' };
  }

  const leadingInteger = (text) => {
    const m = text.match(/\d+/);
    return m ? m[0] : null;
  };

  const read = (field) => {
    for (const rule of field.candidates) {
      const found = Array.from(document.querySelectorAll(rule.selector)).slice(0, plan.maxElements);
      for (const el of found) {
        let raw = rule.attribute ? el.getAttribute(rule.attribute) : null;
        if (!raw || !raw.trim()) raw = el.textContent;
        if (!raw) continue;
        let value = raw.trim();
        if (!value) continue;
        if ((rule.reject || []).some((t) => value === t || value.includes(t))) continue;
        if (field.post === 'leading_integer') value = leadingInteger(value);
        if (value) return value;
      }
    }
    return null;
  };

  const derive = () => {
    const out = {};
    for (const field of plan.fields) out[field.key] = read(field);
    return out;
  };

  let last = derive();
  const observer = new MutationObserver(() => {
    const next = derive();
    const changed = plan.fields.some((f) => next[f.key] !== last[f.key]);
    if (!changed) return;
    last = next;
    const payload = {};
    for (const [key, value] of Object.entries(next)) {
      if (value !== null) payload[key] = value;
    }
    payload.timestamp = new Date().toISOString();
    console.log('__CHANGE__' + JSON.stringify(payload));
  });

  observer.observe(root, {
    childList: true,
    subtree: true,
    characterData: true,
    attributes: true,
    attributeFilter: plan.attributes,
  });
  registry.push(observer);
  console.log('__NOTICE__ready');
  return { installed: true };
})()"#;

const CLEANUP_TEMPLATE: &str = r#"(() => {
  const registry = window.__REGISTRY__ || [];
  for (const observer of registry) {
    try { observer.disconnect(); } catch (_) {}
  }
  window.__REGISTRY__ = [];
  return { disconnected: registry.length };
})()"#;

/// Builds the self-diffing observer installed into the auction context.
///
/// The observer re-derives every field on each mutation batch and logs one
/// `CHANGE:` line only when a derived value differs from the last one it
/// emitted (seeded at install time).
pub fn observer_script(plan: &ObserverPlan) -> Result<String, serde_json::Error> {
    let plan_json = serde_json::to_string(plan)?;

    Ok(OBSERVER_TEMPLATE
        .replace("__PLAN__", &plan_json)
        .replace("__REGISTRY__", OBSERVER_REGISTRY)
        .replace("__NOTICE__", NOTICE_TAG)
        .replace("__CHANGE__", CHANGE_TAG))
}

/// Disconnects every registered observer.
pub fn cleanup_script() -> String {
    CLEANUP_TEMPLATE.replace("__REGISTRY__", OBSERVER_REGISTRY)
}
