//! Browser session and the DOM primitives every task is built from.
//!
//! Selectors starting with `/` or `(` are XPath, anything else is CSS. All lookups run as injected JS so both kinds
//! behave the same; only real keystrokes and file inputs go through CDP element handles (CSS only).

#[cfg(feature = "xdg")]
use std::path::PathBuf;
use std::{future::Future, path::Path, time::Duration};

use chromiumoxide::{
	Page,
	browser::{Browser, BrowserConfig},
	cdp::browser_protocol::dom::SetFileInputFilesParams,
};
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use futures::StreamExt;
use tokio::task::JoinHandle;
#[cfg(feature = "xdg")]
use v_utils::xdg_state_dir;
use v_utils::log;

/// Interval between two checks of a polled condition
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One browser with one page; everything a task does goes through `page`
pub struct Session {
	pub browser: Browser,
	pub page: Page,
	/// Timestamp label of this run, used to group failure snapshots
	pub run_id: String,
	handler: JoinHandle<()>,
}

impl Session {
	pub async fn launch(visible: bool) -> Result<Self> {
		let config = if visible {
			BrowserConfig::builder()
				.with_head() // Visible browser with UI
				.window_size(1400, 1000)
				.build()
				.map_err(|e| eyre!("Failed to build browser config: {}", e))?
		} else {
			BrowserConfig::builder()
				.window_size(1400, 1000)
				.build() // Headless mode
				.map_err(|e| eyre!("Failed to build browser config: {}", e))?
		};

		let (browser, mut handler) = Browser::launch(config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;

		// Drain CDP events, otherwise the browser hangs
		let handler = tokio::spawn(async move { while let Some(_event) = handler.next().await {} });

		let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {}", e))?;
		let run_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

		Ok(Self { browser, page, run_id, handler })
	}

	pub async fn close(mut self) -> Result<()> {
		drop(self.page);
		self.browser.close().await.map_err(|e| eyre!("Failed to close browser: {}", e))?;
		self.handler.abort();
		Ok(())
	}
}

/// Navigate and give the page a fixed settle time
pub async fn goto(page: &Page, url: &str, settle: Duration) -> Result<()> {
	page.goto(url).await.map_err(|e| eyre!("Failed to navigate to {}: {}", url, e))?;
	tokio::time::sleep(settle).await;
	Ok(())
}

pub async fn current_url(page: &Page) -> String {
	page.url().await.ok().flatten().unwrap_or_default()
}

/// Quote `s` as a JS string literal
pub fn js_str(s: &str) -> String {
	match serde_json::to_string(s) {
		Ok(quoted) => quoted,
		Err(_) => "\"\"".to_string(),
	}
}

/// Quote `s` as an XPath 1.0 string literal; XPath has no escapes, so mixed quotes need `concat()`
pub fn xpath_literal(s: &str) -> String {
	if !s.contains('\'') {
		return format!("'{s}'");
	}
	if !s.contains('"') {
		return format!("\"{s}\"");
	}
	let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
	format!("concat({})", parts.join(", \"'\", "))
}

pub fn is_xpath(selector: &str) -> bool {
	selector.starts_with('/') || selector.starts_with('(')
}

/// JS expression evaluating to an array of all elements matching `selector`
pub fn js_find_all(selector: &str) -> String {
	if is_xpath(selector) {
		format!(
			"(function() {{ const r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); \
			 const out = []; for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); return out; }})()",
			js_str(selector)
		)
	} else {
		format!("Array.from(document.querySelectorAll({}))", js_str(selector))
	}
}

/// JS function deciding whether an element is rendered
const JS_IS_VISIBLE: &str =
	"(el) => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length) && getComputedStyle(el).visibility !== 'hidden'";

/// Run a script and return its JSON value (`null` when it returns nothing)
pub async fn eval_value(page: &Page, script: String, what: &str) -> Result<serde_json::Value> {
	let result = page.evaluate(script).await.map_err(|e| eyre!("Failed to {}: {}", what, e))?;
	Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
}

async fn eval_bool(page: &Page, script: String, what: &str) -> Result<bool> {
	Ok(eval_value(page, script, what).await?.as_bool().unwrap_or(false))
}

/// Poll `check` until it holds or `timeout` passes. Evaluation errors (page mid-navigation) count as "not yet".
async fn poll<F, Fut>(timeout: Duration, mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<bool>>, {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		if let Ok(true) = check().await {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(POLL_INTERVAL).await;
	}
}

pub async fn count(page: &Page, selector: &str) -> Result<usize> {
	let script = format!("{}.length", js_find_all(selector));
	let value = eval_value(page, script, &format!("count `{selector}`")).await?;
	Ok(value.as_u64().unwrap_or(0) as usize)
}

/// Wait until at least one element matches `selector`
pub async fn wait_for(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
	let script = format!("{}.length > 0", js_find_all(selector));
	if poll(timeout, || eval_bool(page, script.clone(), "look up element")).await {
		return Ok(());
	}
	bail!("Timed out after {}s waiting for `{}`", timeout.as_secs(), selector)
}

/// Wait until an element matching `selector` is rendered
pub async fn wait_for_visible(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
	let script = format!("{}.some({})", js_find_all(selector), JS_IS_VISIBLE);
	if poll(timeout, || eval_bool(page, script.clone(), "check visibility")).await {
		return Ok(());
	}
	bail!("Timed out after {}s waiting for `{}` to be visible", timeout.as_secs(), selector)
}

/// Wait until nothing matching `selector` is rendered (absent counts as hidden)
pub async fn wait_until_hidden(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
	let script = format!("!{}.some({})", js_find_all(selector), JS_IS_VISIBLE);
	if poll(timeout, || eval_bool(page, script.clone(), "check visibility")).await {
		return Ok(());
	}
	bail!("Timed out after {}s waiting for `{}` to disappear", timeout.as_secs(), selector)
}

pub async fn wait_for_text(page: &Page, needle: &str, timeout: Duration) -> Result<()> {
	let script = format!("!!document.body && document.body.innerText.includes({})", js_str(needle));
	if poll(timeout, || eval_bool(page, script.clone(), "read page text")).await {
		return Ok(());
	}
	bail!("Timed out after {}s waiting for text {:?}", timeout.as_secs(), needle)
}

pub async fn wait_for_url_contains(page: &Page, needle: &str, timeout: Duration) -> Result<()> {
	let found = poll(timeout, || async { Ok(current_url(page).await.contains(needle)) }).await;
	if found {
		return Ok(());
	}
	bail!("Timed out after {}s waiting for URL containing {:?}", timeout.as_secs(), needle)
}

/// Scroll the `index`th match into view and click it via JS. A negative index counts from the end.
pub async fn js_click(page: &Page, selector: &str, index: isize) -> Result<()> {
	let pick = format!(
		"(function() {{ const all = {}; const i = {index} < 0 ? all.length + ({index}) : {index}; return all[i] || null; }})()",
		js_find_all(selector)
	);
	click_picked(page, &pick, &format!("#{index} for `{selector}`")).await
}

pub async fn click_last(page: &Page, selector: &str) -> Result<()> {
	js_click(page, selector, -1).await
}

/// Click the first rendered match. Moodle keeps every row's action menu in the DOM, so the first match is often a hidden one.
pub async fn click_visible(page: &Page, selector: &str) -> Result<()> {
	let pick = format!("({}.find({}) || null)", js_find_all(selector), JS_IS_VISIBLE);
	click_picked(page, &pick, &format!("visible `{selector}`")).await
}

async fn click_picked(page: &Page, pick: &str, what: &str) -> Result<()> {
	let scrolled = eval_bool(
		page,
		format!("(function() {{ const el = {pick}; if (!el) return false; el.scrollIntoView(true); return true; }})()"),
		"scroll to element",
	)
	.await?;
	if !scrolled {
		bail!("No element {}", what);
	}
	tokio::time::sleep(Duration::from_secs(1)).await;

	let clicked = eval_bool(
		page,
		format!("(function() {{ const el = {pick}; if (!el) return false; el.click(); return true; }})()"),
		"click element",
	)
	.await?;
	if !clicked {
		bail!("Element {} vanished before the click", what);
	}
	Ok(())
}

/// Wait for `selector` to be rendered, then click the first rendered match
pub async fn wait_and_click(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
	wait_for_visible(page, selector, timeout).await?;
	click_visible(page, selector).await
}

/// Replace the value of the first match and fire `input`/`change`, like a user edit would
pub async fn set_value(page: &Page, selector: &str, value: &str) -> Result<()> {
	let script = format!(
		r#"
		(function() {{
			const el = {}[0];
			if (!el) return false;
			el.focus();
			el.value = {};
			el.dispatchEvent(new Event('input', {{ bubbles: true }}));
			el.dispatchEvent(new Event('change', {{ bubbles: true }}));
			return true;
		}})()
		"#,
		js_find_all(selector),
		js_str(value)
	);
	if !eval_bool(page, script, "set field value").await? {
		bail!("No field `{}` to fill", selector);
	}
	Ok(())
}

/// Type `text` with real key events (CSS selectors only)
pub async fn type_into(page: &Page, selector: &str, text: &str) -> Result<()> {
	let element = page.find_element(selector).await.map_err(|e| eyre!("Failed to find `{}`: {}", selector, e))?;
	element.click().await.map_err(|e| eyre!("Failed to focus `{}`: {}", selector, e))?;
	element.type_str(text).await.map_err(|e| eyre!("Failed to type into `{}`: {}", selector, e))?;
	Ok(())
}

pub async fn press_enter(page: &Page, selector: &str) -> Result<()> {
	let element = page.find_element(selector).await.map_err(|e| eyre!("Failed to find `{}`: {}", selector, e))?;
	element.press_key("Enter").await.map_err(|e| eyre!("Failed to press Enter in `{}`: {}", selector, e))?;
	Ok(())
}

/// Select the option whose visible label is exactly `text`
pub async fn select_by_text(page: &Page, selector: &str, text: &str) -> Result<()> {
	let script = format!(
		r#"
		(function() {{
			const select = {}[0];
			if (!select) return 'missing';
			const wanted = {};
			const option = Array.from(select.options).find(o => o.text.trim() === wanted);
			if (!option) return 'no-option';
			select.value = option.value;
			select.dispatchEvent(new Event('change', {{ bubbles: true }}));
			return 'ok';
		}})()
		"#,
		js_find_all(selector),
		js_str(text)
	);
	match eval_value(page, script, "select option").await?.as_str() {
		Some("ok") => Ok(()),
		Some("no-option") => bail!("`{}` has no option {:?}", selector, text),
		_ => bail!("No select `{}`", selector),
	}
}

pub async fn is_checked(page: &Page, selector: &str) -> Result<bool> {
	let script = format!("(function() {{ const el = {}[0]; return el ? !!el.checked : null; }})()", js_find_all(selector));
	match eval_value(page, script, "read checkbox").await? {
		serde_json::Value::Bool(checked) => Ok(checked),
		_ => bail!("No checkbox `{}`", selector),
	}
}

/// Click the checkbox only when its state differs. Returns whether it was clicked.
pub async fn set_checked(page: &Page, selector: &str, checked: bool) -> Result<bool> {
	if is_checked(page, selector).await? == checked {
		return Ok(false);
	}
	js_click(page, selector, 0).await?;
	Ok(true)
}

pub async fn scroll_to_bottom(page: &Page) -> Result<()> {
	eval_value(page, "window.scrollTo(0, document.body.scrollHeight)".to_string(), "scroll page").await?;
	Ok(())
}

/// Plain text to editor HTML: blank lines separate paragraphs, single newlines become `<br>`
pub fn text_to_html(text: &str) -> String {
	let escape = |s: &str| s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;");
	text.replace("\r\n", "\n")
		.split("\n\n")
		.map(str::trim)
		.filter(|p| !p.is_empty())
		.map(|p| format!("<p>{}</p>", p.lines().map(escape).collect::<Vec<_>>().join("<br>")))
		.collect()
}

/// Fill a Moodle rich-text field, whichever editor backs it (TinyMCE, Atto's contenteditable, or a bare textarea)
pub async fn fill_rich_text(page: &Page, editable_id: &str, textarea_id: &str, text: &str) -> Result<()> {
	let script = format!(
		r#"
		(function() {{
			const html = {html};
			const tinyEditor = (window.tinymce && window.tinymce.get) ? window.tinymce.get({textarea}) : null;
			if (tinyEditor) {{
				tinyEditor.setContent(html);
				tinyEditor.save();
				return 'tinymce';
			}}
			const editable = document.getElementById({editable});
			const textarea = document.getElementById({textarea});
			if (editable) {{
				editable.focus();
				editable.innerHTML = html;
				editable.dispatchEvent(new Event('input', {{ bubbles: true }}));
				editable.dispatchEvent(new Event('change', {{ bubbles: true }}));
			}}
			if (textarea) {{
				textarea.value = html;
				textarea.dispatchEvent(new Event('change', {{ bubbles: true }}));
			}}
			return editable ? 'atto' : (textarea ? 'textarea' : null);
		}})()
		"#,
		html = js_str(&text_to_html(text)),
		editable = js_str(editable_id),
		textarea = js_str(textarea_id),
	);
	match eval_value(page, script, "fill editor").await?.as_str() {
		Some(kind) => {
			tracing::debug!("Filled {} via {}", textarea_id, kind);
			Ok(())
		}
		None => bail!("No editor `{}` / `{}` on page", editable_id, textarea_id),
	}
}

/// Hand local files to a file `<input>` (CSS selectors only)
pub async fn set_files(page: &Page, selector: &str, paths: &[&Path]) -> Result<()> {
	let element = page.find_element(selector).await.map_err(|e| eyre!("Failed to find file input `{}`: {}", selector, e))?;
	let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
	let params = SetFileInputFilesParams::builder()
		.files(files)
		.backend_node_id(element.backend_node_id.clone())
		.build()
		.map_err(|e| eyre!("Failed to build file input params: {}", e))?;
	page.execute(params).await.map_err(|e| eyre!("Failed to set files on `{}`: {}", selector, e))?;
	Ok(())
}

/// Moodle's per-session CSRF token
pub async fn sesskey(page: &Page) -> Result<String> {
	let value = eval_value(page, "(window.M && M.cfg) ? M.cfg.sesskey : null".to_string(), "read sesskey").await?;
	value.as_str().filter(|s| !s.is_empty()).map(str::to_string).ok_or_else(|| eyre!("No sesskey on page (not logged in?)"))
}

pub async fn cookie(page: &Page, name: &str) -> Result<Option<String>> {
	let cookies = page.get_cookies().await.map_err(|e| eyre!("Failed to read cookies: {}", e))?;
	Ok(cookies.into_iter().find(|c| c.name == name).map(|c| c.value))
}

pub async fn page_html(page: &Page) -> Result<String> {
	let value = eval_value(page, "document.documentElement.outerHTML".to_string(), "get page HTML").await?;
	Ok(value.as_str().unwrap_or("<html></html>").to_string())
}

/// Save the current page's HTML to disk for post-mortem of a failed step
#[cfg(feature = "xdg")]
pub async fn save_page_html(page: &Page, run_id: &str, label: &str) -> Result<PathBuf> {
	let html_dir = xdg_state_dir!("persist_htmls").join(run_id);
	std::fs::create_dir_all(&html_dir).map_err(|e| eyre!("Failed to create HTML dir: {}", e))?;

	let html = page_html(page).await?;
	let safe_label: String = label.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
	let timestamp = chrono::Local::now().format("%H%M%S");

	let filepath = html_dir.join(format!("{timestamp}_{safe_label}.html"));
	std::fs::write(&filepath, html).map_err(|e| eyre!("Failed to write HTML file: {}", e))?;

	log!("Saved page HTML to: {}", filepath.display());
	Ok(filepath)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn js_str_escapes_quotes_and_newlines() {
		assert_eq!(js_str(r#"He said "hi"\n"#), r#""He said \"hi\"\\n""#);
		assert_eq!(js_str("a\nb"), r#""a\nb""#);
	}

	#[test]
	fn xpath_literal_picks_quote_style() {
		assert_eq!(xpath_literal("Lab 1"), "'Lab 1'");
		assert_eq!(xpath_literal("Lab's"), "\"Lab's\"");
		assert_eq!(xpath_literal(r#"a"b'c"#), r#"concat('a"b', "'", 'c')"#);
	}

	#[test]
	fn selector_kind() {
		assert!(is_xpath("//a[contains(@href, 'grade')]"));
		assert!(is_xpath("(//button)[1]"));
		assert!(!is_xpath("a.btn.btn-primary"));
		assert!(!is_xpath("#id_subject"));
	}

	#[test]
	fn find_all_uses_matching_engine() {
		assert_eq!(js_find_all("#id_name"), r##"Array.from(document.querySelectorAll("#id_name"))"##);
		let xpath = js_find_all("//span[@title='Lab 1']");
		assert!(xpath.contains("document.evaluate(\"//span[@title='Lab 1']\""));
		assert!(xpath.contains("ORDERED_NODE_SNAPSHOT_TYPE"));
	}

	#[test]
	fn text_to_html_paragraphs() {
		assert_eq!(text_to_html("Hello\nworld\n\nSee <attached> & enjoy"), "<p>Hello<br>world</p><p>See &lt;attached&gt; &amp; enjoy</p>");
		assert_eq!(text_to_html("\n\n"), "");
	}
}
