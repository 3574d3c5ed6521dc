//! JavaScript injected into pages.
//!
//! Every expression evaluates to a JSON string (or a promise of one) because
//! the protocol does not hand objects back by value. Arguments are spliced in as
//! JSON literals through [`with_args`].

use serde_json::Value;

/// Replace each `__NAME__` placeholder with the JSON encoding of its value.
pub fn with_args(template: &str, args: &[(&str, Value)]) -> String {
    let mut script = template.to_string();
    for (name, value) in args {
        script = script.replace(&format!("__{name}__"), &value.to_string());
    }
    script
}

pub fn click_text(text: &str) -> String {
    with_args(CLICK_TEXT_JS, &[("TEXT", Value::from(text))])
}

pub fn click_selector(selector: &str) -> String {
    with_args(CLICK_SELECTOR_JS, &[("SELECTOR", Value::from(selector))])
}

pub fn scroll_by(delta: i64) -> String {
    with_args(SCROLL_JS, &[("DELTA", Value::from(delta))])
}

pub fn wait_stable(quiet_ms: u64, timeout_ms: u64) -> String {
    with_args(
        WAIT_STABLE_JS,
        &[
            ("QUIET", Value::from(quiet_ms)),
            ("TIMEOUT", Value::from(timeout_ms)),
        ],
    )
}

pub fn describe_candidates(selectors: &[&str], limit: usize) -> String {
    with_args(
        DESCRIBE_CANDIDATES_JS,
        &[
            ("SELECTORS", Value::from(selectors.to_vec())),
            ("LIMIT", Value::from(limit)),
        ],
    )
}

/// Interactive groups first, then generic containers. Within a strategy the
/// earlier group wins.
const CLICK_TEXT_JS: &str = r#"
(() => {
  const target = String(__TEXT__).trim().replace(/\s+/g, ' ').toLowerCase();
  const words = target.split(' ').filter(Boolean);
  const groups = [
    'button, [role="button"], input[type="submit"], input[type="button"]',
    'a[href], [role="link"], [role="menuitem"], [role="tab"], [role="option"]',
    'label, li, summary, [onclick], [tabindex]',
    'div, span, p, td, th, h1, h2, h3, h4, h5, h6'
  ];
  function visible(el) {
    const s = getComputedStyle(el), r = el.getBoundingClientRect();
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0' && r.width > 0 && r.height > 0;
  }
  function label(el) {
    return (el.innerText || el.value || el.textContent || '').trim().replace(/\s+/g, ' ').toLowerCase();
  }
  const strategies = [
    ['exact', (t) => t === target],
    ['prefix', (t) => t.startsWith(target)],
    ['all-words', (t) => t.length < 200 && words.length > 0 && words.every(w => t.includes(w))],
    ['aria-label', (t, el) => (el.getAttribute('aria-label') || '').toLowerCase().includes(target)],
  ];
  if (!target) return JSON.stringify({ ok: false });
  for (const [name, test] of strategies) {
    for (const group of groups) {
      for (const el of document.querySelectorAll(group)) {
        if (!visible(el)) continue;
        const t = label(el);
        if (!test(t, el)) continue;
        el.scrollIntoView({ block: 'center' });
        el.click();
        return JSON.stringify({ ok: true, strategy: name, tag: el.tagName.toLowerCase(), text: t.slice(0, 50) });
      }
    }
  }
  return JSON.stringify({ ok: false });
})()
"#;

const CLICK_SELECTOR_JS: &str = r#"
(() => {
  let el = null;
  try { el = document.querySelector(__SELECTOR__); } catch (e) { return JSON.stringify({ ok: false, error: String(e) }); }
  if (!el) return JSON.stringify({ ok: false });
  el.scrollIntoView({ block: 'center' });
  el.click();
  return JSON.stringify({ ok: true, tag: el.tagName.toLowerCase() });
})()
"#;

const SCROLL_JS: &str = r#"
(() => {
  window.scrollBy(0, -(__DELTA__));
  return JSON.stringify({ y: Math.round(window.scrollY) });
})()
"#;

const WAIT_STABLE_JS: &str = r#"
new Promise((resolve) => {
  const quiet = __QUIET__, limit = __TIMEOUT__;
  let done = false, timer = null;
  const root = document.documentElement || document;
  const observer = new MutationObserver(() => {
    clearTimeout(timer);
    timer = setTimeout(() => finish(true), quiet);
  });
  const deadline = setTimeout(() => finish(false), limit);
  function finish(stable) {
    if (done) return;
    done = true;
    observer.disconnect();
    clearTimeout(timer);
    clearTimeout(deadline);
    resolve(JSON.stringify({ stable }));
  }
  observer.observe(root, { subtree: true, childList: true, attributes: true, characterData: true });
  timer = setTimeout(() => finish(true), quiet);
})
"#;

const DESCRIBE_CANDIDATES_JS: &str = r#"
(() => {
  const selectors = __SELECTORS__, limit = __LIMIT__, out = [];
  function visible(el) {
    const s = getComputedStyle(el), r = el.getBoundingClientRect();
    return s.display !== 'none' && s.visibility !== 'hidden' && r.width > 0 && r.height > 0;
  }
  for (const sel of selectors) {
    let nodes;
    try { nodes = document.querySelectorAll(sel); } catch (e) { continue; }
    for (const el of nodes) {
      if (!visible(el)) continue;
      const tag = el.tagName.toLowerCase();
      const id = el.id ? '#' + el.id : '';
      const cls = typeof el.className === 'string' && el.className.trim()
        ? '.' + el.className.trim().split(/\s+/).slice(0, 2).join('.')
        : '';
      const tid = el.getAttribute('data-testid') ? '[data-testid="' + el.getAttribute('data-testid') + '"]' : '';
      const text = (el.innerText || el.value || '').trim().replace(/\s+/g, ' ').slice(0, 30);
      const desc = tag + (tid || id || cls) + (text ? ' ("' + text + '")' : '');
      if (out.includes(desc)) continue;
      out.push(desc);
      if (out.length >= limit) return JSON.stringify(out);
    }
  }
  return JSON.stringify(out);
})()
"#;

/// Tags visible interactive elements with `data-agent-id` and collects leaf text.
/// Reads the DOM without touching layout or styles.
pub const PAGE_CONTEXT_JS: &str = r#"
(() => {
  const SKIP = new Set(['SCRIPT', 'STYLE', 'NOSCRIPT', 'SVG', 'LINK', 'META', 'TEMPLATE']);
  const KINDS = { a: 'link', button: 'button', input: 'input', textarea: 'input', select: 'select' };
  const MAX_ELEMENTS = 50, MAX_TEXT = 20000;
  const elements = [], texts = [], seen = new Set();
  let id = 0;

  function isVisible(el) {
    if (el.offsetParent === null && el.tagName !== 'BODY' && getComputedStyle(el).position !== 'fixed') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
  }

  function kindOf(el, tag) {
    if (el.getAttribute('role') === 'button') return 'button';
    if (tag === 'input' && (el.type === 'submit' || el.type === 'button')) return 'button';
    if (tag === 'input' && el.type === 'hidden') return null;
    return KINDS[tag] || null;
  }

  function walk(node, depth) {
    if (depth > 25) return;
    for (const child of node.children) {
      if (SKIP.has(child.tagName)) continue;
      if (!isVisible(child)) continue;
      const tag = child.tagName.toLowerCase();
      const kind = kindOf(child, tag);
      if (kind && elements.length < MAX_ELEMENTS) {
        const agentId = 'e' + (id++);
        child.setAttribute('data-agent-id', agentId);
        const text = (child.innerText || child.value || child.placeholder || child.getAttribute('aria-label') || '')
          .trim().replace(/\s+/g, ' ').slice(0, 80);
        const key = kind + '|' + text + '|' + (child.getAttribute('href') || '');
        if (!seen.has(key)) {
          seen.add(key);
          elements.push({
            tag,
            text,
            selector: '[data-agent-id="' + agentId + '"]',
            type: kind,
            href: tag === 'a' ? (child.getAttribute('href') || '') : ''
          });
        }
      } else if (child.children.length === 0) {
        const text = (child.textContent || '').trim();
        if (text.length > 2 && text.length < 300) texts.push(text);
      }
      walk(child, depth + 1);
    }
  }

  if (document.body) walk(document.body, 0);
  return JSON.stringify({
    url: location.href,
    title: document.title,
    elements,
    text: texts.join('\n').slice(0, MAX_TEXT)
  });
})()
"#;

/// Visible clickable elements, modal contents only when a modal is open, with
/// centre coordinates for pointer clicks.
pub const FIND_ELEMENTS_JS: &str = r#"
(() => {
  const results = [], seen = new Set(), counts = {};
  function isVisible(el) {
    if (!el) return false;
    const s = getComputedStyle(el), r = el.getBoundingClientRect();
    return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0'
      && r.width > 0 && r.height > 0 && r.top < window.innerHeight && r.bottom > 0;
  }
  function cssFor(el) {
    const tag = el.tagName.toLowerCase();
    if (el.id && el.id.length < 50) return tag + '#' + el.id;
    const aria = el.getAttribute('aria-label');
    if (aria && aria.length < 100) return tag + '[aria-label="' + aria.replace(/"/g, '\\"') + '"]';
    const tid = el.getAttribute('data-testid');
    if (tid) return tag + '[data-testid="' + tid + '"]';
    if (el.name) return tag + '[name="' + el.name + '"]';
    return tag;
  }
  function textOf(el) {
    let t = '';
    for (const n of el.childNodes) if (n.nodeType === Node.TEXT_NODE) t += n.textContent;
    t = t.trim();
    if (t && t.length < 50) return t;
    return (el.innerText || '').trim().split('\n')[0].substring(0, 50);
  }
  function describe(el) {
    return (el.innerText || '').trim().substring(0, 60).replace(/\n/g, ' ')
      || el.placeholder || el.getAttribute('aria-label') || '';
  }
  const clickable = ['button', 'a[href]', '[role="button"]', '[role="menuitem"]', '[role="option"]',
    'input:not([type="hidden"])', 'textarea', 'select', '[onclick]', '[data-testid]', 'li', 'label'];
  const modals = ['[role="dialog"]', '[aria-modal="true"]', '.modal', '[class*="modal"]'];
  const all = [];
  function collect(root, sel) {
    for (const el of root.querySelectorAll(sel)) {
      if (!isVisible(el)) continue;
      const css = cssFor(el);
      counts[css] = (counts[css] || 0) + 1;
      all.push({ el, css });
    }
  }
  let hasModal = false;
  for (const ms of modals) {
    try {
      for (const m of document.querySelectorAll(ms)) {
        if (!isVisible(m)) continue;
        hasModal = true;
        collect(m, clickable.join(','));
      }
    } catch (e) {}
  }
  if (!hasModal) {
    for (const sel of clickable) {
      try { collect(document, sel); } catch (e) {}
    }
  }
  for (const item of all) {
    const el = item.el, text = textOf(el), r = el.getBoundingClientRect(), key = item.css + '|' + text;
    if (seen.has(key)) continue;
    seen.add(key);
    results.push({
      displaySelector: text ? 'text:' + text : item.css,
      cssSelector: counts[item.css] === 1 ? item.css : '',
      description: describe(el),
      x: Math.round(r.x + r.width / 2),
      y: Math.round(r.y + r.height / 2)
    });
    if (results.length >= 60) break;
  }
  return JSON.stringify(results);
})()
"#;

pub const DOCUMENT_SIZE_JS: &str = r#"
(() => {
  const d = document.documentElement, b = document.body;
  return JSON.stringify({
    width: Math.max(d.scrollWidth, b ? b.scrollWidth : 0, d.clientWidth),
    height: Math.max(d.scrollHeight, b ? b.scrollHeight : 0, d.clientHeight)
  });
})()
"#;

/// Called on an element handle.
pub const IS_VISIBLE_FN: &str = r#"function() {
  const s = getComputedStyle(this), r = this.getBoundingClientRect();
  return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0' && r.width > 0 && r.height > 0;
}"#;

/// Called on an element handle before typing.
pub const CLEAR_VALUE_FN: &str = r#"function() {
  if ('value' in this) {
    this.value = '';
    this.dispatchEvent(new Event('input', { bubbles: true }));
  } else if (this.isContentEditable) {
    this.textContent = '';
  }
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_json_encoded() {
        let script = click_text(r#"Say "hi" & 'bye'"#);
        assert!(script.contains(r#"String("Say \"hi\" & 'bye'")"#));
        assert!(!script.contains("__TEXT__"));
    }

    #[test]
    fn scroll_negates_delta_in_page() {
        assert!(scroll_by(-500).contains("window.scrollBy(0, -(-500))"));
    }

    #[test]
    fn candidate_selectors_become_an_array() {
        let script = describe_candidates(&["button", "a[href]"], 15);
        assert!(script.contains(r#"["button","a[href]"]"#));
        assert!(script.contains("limit = 15"));
    }
}
