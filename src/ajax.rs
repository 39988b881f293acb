//! Moodle's internal `core_form_dynamic_form` service, called the way its modal forms call it.
//!
//! The service answers a call without the QuickForm submission marker by rendering the form with its current
//! values, and processes it when the marker and sesskey are present. Renaming a grade item is therefore two
//! requests: load the form, then post it back with one field changed.

use chromiumoxide::Page;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{Value, json};
use url::{Url, form_urlencoded};

use crate::browser;

pub const SESSION_COOKIE: &str = "MoodleSession";
pub const DYNAMIC_FORM_METHOD: &str = "core_form_dynamic_form";
/// Form class behind the gradebook setup's "Edit grade item" modal
pub const ADD_ITEM_FORM: &str = "core_grades\\form\\add_item";

/// What authenticates a call: the page's sesskey plus the session cookie
#[derive(Clone, Debug)]
pub struct MoodleSession {
	pub base_url: String,
	pub sesskey: String,
	pub session_cookie: String,
}

impl MoodleSession {
	/// Lift the sesskey and session cookie out of a logged-in page
	pub async fn from_page(page: &Page, base_url: &str) -> Result<Self> {
		let sesskey = browser::sesskey(page).await?;
		let session_cookie = browser::cookie(page, SESSION_COOKIE).await?.ok_or_else(|| eyre!("{} cookie not found", SESSION_COOKIE))?;
		tracing::info!("Retrieved sesskey and {} cookie.", SESSION_COOKIE);
		Ok(Self {
			base_url: base_url.trim_end_matches('/').to_string(),
			sesskey,
			session_cookie,
		})
	}

	pub fn service_url(&self) -> Result<Url> {
		let mut url = Url::parse(&format!("{}/lib/ajax/service.php", self.base_url)).map_err(|e| eyre!("Invalid base URL '{}': {}", self.base_url, e))?;
		url.query_pairs_mut().append_pair("sesskey", &self.sesskey).append_pair("info", DYNAMIC_FORM_METHOD);
		Ok(url)
	}

	pub fn cookie_header(&self) -> String {
		format!("{}={}", SESSION_COOKIE, self.session_cookie)
	}
}

/// Result of one `core_form_dynamic_form` call
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DynamicFormResponse {
	pub submitted: bool,
	/// Rendered form, present when not submitted (first load, or validation failed)
	#[serde(default)]
	pub html: Option<String>,
	/// JSON-encoded result of the form's processing, present when submitted
	#[serde(default)]
	pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServiceReply {
	Batch(Vec<ServiceResult>),
	Fault(ServiceFault),
}

#[derive(Debug, Deserialize)]
struct ServiceResult {
	error: bool,
	#[serde(default)]
	data: Option<Value>,
	#[serde(default)]
	exception: Option<ServiceException>,
}

#[derive(Debug, Deserialize)]
struct ServiceException {
	message: String,
	#[serde(default)]
	errorcode: Option<String>,
}

/// Whole-request failure (bad sesskey, expired session)
#[derive(Debug, Deserialize)]
struct ServiceFault {
	error: String,
	#[serde(default)]
	errorcode: Option<String>,
}

pub fn request_body(form_class: &str, formdata: &str) -> Value {
	json!([{
		"index": 0,
		"methodname": DYNAMIC_FORM_METHOD,
		"args": { "form": form_class, "formdata": formdata },
	}])
}

pub fn parse_service_response(body: &str) -> Result<DynamicFormResponse> {
	let reply: ServiceReply = serde_json::from_str(body).map_err(|e| eyre!("Unexpected service response: {} - raw: '{}'", e, truncate(body, 200)))?;

	let result = match reply {
		ServiceReply::Fault(fault) => bail!("Service call rejected: {} ({})", fault.error, fault.errorcode.as_deref().unwrap_or("no errorcode")),
		ServiceReply::Batch(results) => results.into_iter().next().ok_or_else(|| eyre!("Service returned no results"))?,
	};

	if result.error {
		let (message, code) = match result.exception {
			Some(exception) => (exception.message, exception.errorcode),
			None => ("unknown error".to_string(), None),
		};
		bail!("Service call failed: {} ({})", message, code.as_deref().unwrap_or("no errorcode"));
	}

	let data = result.data.ok_or_else(|| eyre!("Service result has no data"))?;
	serde_json::from_value(data).map_err(|e| eyre!("Unexpected dynamic form result: {}", e))
}

fn truncate(s: &str, max: usize) -> &str {
	match s.char_indices().nth(max) {
		Some((idx, _)) => &s[..idx],
		None => s,
	}
}

pub fn encode_form<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> String {
	let mut serializer = form_urlencoded::Serializer::new(String::new());
	for (k, v) in pairs {
		serializer.append_pair(k.as_ref(), v.as_ref());
	}
	serializer.finish()
}

fn selector(css: &str) -> Result<Selector> {
	Selector::parse(css).map_err(|e| eyre!("Invalid selector '{}': {}", css, e))
}

/// Field values a browser would submit for the rendered form, in document order
pub fn form_fields(html: &str) -> Result<Vec<(String, String)>> {
	let doc = Html::parse_fragment(html);
	let fields_sel = selector("input[name], select[name], textarea[name]")?;
	let option_sel = selector("option")?;

	let mut fields = Vec::new();
	for el in doc.select(&fields_sel) {
		let attrs = el.value();
		if attrs.attr("disabled").is_some() {
			continue;
		}
		let Some(name) = attrs.attr("name") else { continue };

		match attrs.name() {
			"input" => {
				let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
				match kind.as_str() {
					"submit" | "button" | "reset" | "image" | "file" => continue,
					"checkbox" | "radio" if attrs.attr("checked").is_none() => continue,
					"checkbox" | "radio" => fields.push((name.to_string(), attrs.attr("value").unwrap_or("on").to_string())),
					_ => fields.push((name.to_string(), attrs.attr("value").unwrap_or_default().to_string())),
				}
			}
			"select" => {
				let options: Vec<ElementRef> = el.select(&option_sel).collect();
				let selected: Vec<&ElementRef> = options.iter().filter(|o| o.value().attr("selected").is_some()).collect();
				let chosen = if selected.is_empty() && attrs.attr("multiple").is_none() { options.iter().take(1).collect() } else { selected };
				for option in chosen {
					let value = option.value().attr("value").map(str::to_string).unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
					fields.push((name.to_string(), value));
				}
			}
			_ => fields.push((name.to_string(), el.text().collect())),
		}
	}
	Ok(fields)
}

/// Replace every value of `name` with a single `value`
pub fn set_field(fields: &mut Vec<(String, String)>, name: &str, value: &str) {
	fields.retain(|(n, _)| n != name);
	fields.push((name.to_string(), value.to_string()));
}

/// Validation messages of a re-rendered form
pub fn form_errors(html: &str) -> Result<Vec<String>> {
	let doc = Html::parse_fragment(html);
	let sel = selector(".invalid-feedback, .error")?;
	Ok(doc
		.select(&sel)
		.map(|e| e.text().collect::<String>().split_whitespace().collect::<Vec<_>>().join(" "))
		.filter(|t| !t.is_empty())
		.collect())
}

/// `data-itemid` of the gradebook setup row whose header span is titled `item_name`
pub fn find_item_id(html: &str, item_name: &str) -> Result<Option<String>> {
	let doc = Html::parse_document(html);
	let row_sel = selector("tr[data-itemid]")?;
	let title_sel = selector("span[title]")?;

	for row in doc.select(&row_sel) {
		if row.select(&title_sel).any(|span| span.value().attr("title") == Some(item_name)) {
			return Ok(row.value().attr("data-itemid").filter(|id| !id.is_empty()).map(str::to_string));
		}
	}
	Ok(None)
}

pub struct AjaxClient {
	http: reqwest::Client,
	session: MoodleSession,
}

impl AjaxClient {
	pub fn new(session: MoodleSession) -> Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(std::time::Duration::from_secs(30))
			.build()
			.map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
		Ok(Self { http, session })
	}

	/// One `core_form_dynamic_form` request
	pub async fn call(&self, form_class: &str, formdata: &str) -> Result<DynamicFormResponse> {
		let url = self.session.service_url()?;
		let response = self
			.http
			.post(url)
			.header(reqwest::header::COOKIE, self.session.cookie_header())
			.json(&request_body(form_class, formdata))
			.send()
			.await
			.map_err(|e| eyre!("Service request failed: {}", e))?;

		let status = response.status();
		let body = response.text().await.map_err(|e| eyre!("Failed to read service response: {}", e))?;
		if !status.is_success() {
			bail!("Service responded {}: {}", status, truncate(&body, 200));
		}
		parse_service_response(&body)
	}

	/// Rename a grade item: load its edit form, change `itemname`, submit it back
	pub async fn rename_grade_item(&self, course_id: &str, item_id: &str, new_name: &str) -> Result<()> {
		let args = [
			("courseid", course_id),
			("itemid", item_id),
			("gpr_type", "edit"),
			("gpr_plugin", "tree"),
			("gpr_courseid", course_id),
		];
		let loaded = self.call(ADD_ITEM_FORM, &encode_form(&args)).await?;
		let html = loaded.html.ok_or_else(|| eyre!("Edit form for item {} came back without HTML", item_id))?;

		let mut fields = form_fields(&html)?;
		if !fields.iter().any(|(name, _)| name == "itemname") {
			bail!("Edit form for item {} has no itemname field", item_id);
		}
		for (name, value) in [("courseid", course_id), ("itemid", item_id)] {
			if !fields.iter().any(|(n, _)| n == name) {
				fields.push((name.to_string(), value.to_string()));
			}
		}
		set_field(&mut fields, "itemname", new_name);
		set_field(&mut fields, "sesskey", &self.session.sesskey);
		set_field(&mut fields, &format!("_qf__{}", ADD_ITEM_FORM.replace('\\', "_")), "1");

		let submitted = self.call(ADD_ITEM_FORM, &encode_form(&fields)).await?;
		if !submitted.submitted {
			let errors = submitted.html.as_deref().map(form_errors).transpose()?.unwrap_or_default();
			if errors.is_empty() {
				bail!("Moodle did not accept the edit form for item {}", item_id);
			}
			bail!("Moodle rejected the edit form for item {}: {}", item_id, errors.join("; "));
		}
		tracing::debug!("Rename of item {} returned {:?}", item_id, submitted.data);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{body_string_contains, header, method, path, query_param},
	};

	use super::*;

	const EDIT_FORM: &str = r##"
		<form autocomplete="off" action="#" method="post" class="mform">
			<input name="courseid" type="hidden" value="4">
			<input name="itemid" type="hidden" value="17">
			<input name="sesskey" type="hidden" value="stale">
			<input name="_qf__core_grades_form_add_item" type="hidden" value="1">
			<input type="text" name="itemname" id="id_itemname" value="Tut 1">
			<input type="text" name="grademax" id="id_grademax" value="10.00">
			<input type="hidden" name="hidden" value="0">
			<input type="checkbox" name="hidden" value="1">
			<input type="checkbox" name="locked" value="1" checked>
			<input type="text" name="iteminfo" value="" disabled>
			<select name="parentcategory" id="id_parentcategory">
				<option value="3">Course</option>
				<option value="5" selected>Tutorials</option>
			</select>
			<select name="gradetype"><option value="1">Value</option><option value="2">Scale</option></select>
			<textarea name="notes">first
line</textarea>
			<input type="submit" name="submitbutton" value="Save changes">
		</form>
	"##;

	fn session(base_url: &str) -> MoodleSession {
		MoodleSession {
			base_url: base_url.to_string(),
			sesskey: "abc123".to_string(),
			session_cookie: "s3ss".to_string(),
		}
	}

	#[test]
	fn service_url_carries_sesskey_and_method() {
		let url = session("https://moodle.nu.edu.eg").service_url().unwrap();
		assert_eq!(url.as_str(), "https://moodle.nu.edu.eg/lib/ajax/service.php?sesskey=abc123&info=core_form_dynamic_form");
		assert_eq!(session("https://moodle.nu.edu.eg").cookie_header(), "MoodleSession=s3ss");
	}

	#[test]
	fn garbage_base_url_is_an_error() {
		assert!(session("not a url").service_url().is_err());
	}

	#[test]
	fn body_wraps_one_method_call() {
		let body = request_body(ADD_ITEM_FORM, "itemid=17");
		assert_eq!(body[0]["methodname"], "core_form_dynamic_form");
		assert_eq!(body[0]["args"]["form"], "core_grades\\form\\add_item");
		assert_eq!(body[0]["args"]["formdata"], "itemid=17");
	}

	#[test]
	fn form_encoding_escapes_values() {
		let encoded = encode_form(&[("itemname", "Tutorial 1 & 2"), ("grademax", "10.00")]);
		assert_eq!(encoded, "itemname=Tutorial+1+%26+2&grademax=10.00");
	}

	#[test]
	fn fields_follow_browser_submission_rules() {
		let fields = form_fields(EDIT_FORM).unwrap();
		let get = |name: &str| fields.iter().filter(|(n, _)| n == name).map(|(_, v)| v.as_str()).collect::<Vec<_>>();

		assert_eq!(get("itemname"), vec!["Tut 1"]);
		assert_eq!(get("hidden"), vec!["0"]);
		assert_eq!(get("locked"), vec!["1"]);
		assert!(get("iteminfo").is_empty());
		assert!(get("submitbutton").is_empty());
		assert_eq!(get("parentcategory"), vec!["5"]);
		assert_eq!(get("gradetype"), vec!["1"]);
		assert_eq!(get("notes"), vec!["first\nline"]);
	}

	#[test]
	fn set_field_replaces_all_values() {
		let mut fields = vec![("hidden".to_string(), "0".to_string()), ("hidden".to_string(), "1".to_string())];
		set_field(&mut fields, "hidden", "0");
		set_field(&mut fields, "itemname", "New");
		assert_eq!(fields, vec![("hidden".to_string(), "0".to_string()), ("itemname".to_string(), "New".to_string())]);
	}

	#[test]
	fn item_id_is_found_by_exact_title() {
		let html = r#"
			<table><tbody>
				<tr data-itemid="3"><td><span class="gradeitemheader" title="Tutorials">Tutorials</span></td></tr>
				<tr data-itemid="17"><td><span class="gradeitemheader" title="Tut 1">Tut 1</span></td></tr>
				<tr data-itemid="18"><td><span class="gradeitemheader" title="Tut 10">Tut 10</span></td></tr>
			</tbody></table>
		"#;
		assert_eq!(find_item_id(html, "Tut 1").unwrap(), Some("17".to_string()));
		assert_eq!(find_item_id(html, "Tut 2").unwrap(), None);
	}

	#[test]
	fn response_variants() {
		let loaded = parse_service_response(r#"[{"error":false,"data":{"submitted":false,"html":"<form></form>","javascript":""}}]"#).unwrap();
		assert!(!loaded.submitted);
		assert_eq!(loaded.html.as_deref(), Some("<form></form>"));

		let err = parse_service_response(r#"[{"error":true,"exception":{"message":"Access denied","errorcode":"nopermissions"}}]"#).unwrap_err();
		assert!(err.to_string().contains("nopermissions"));

		let err = parse_service_response(r#"{"error":"Your session has most likely timed out.","errorcode":"servicerequireslogin"}"#).unwrap_err();
		assert!(err.to_string().contains("servicerequireslogin"));

		assert!(parse_service_response("<html>login</html>").is_err());
	}

	#[test]
	fn validation_errors_are_collected() {
		let html = r#"<div class="invalid-feedback" id="id_error_itemname">  Required
		</div><div class="invalid-feedback"></div>"#;
		assert_eq!(form_errors(html).unwrap(), vec!["Required".to_string()]);
	}

	async fn mount_form_load(server: &MockServer) {
		Mock::given(method("POST"))
			.and(path("/lib/ajax/service.php"))
			.and(query_param("sesskey", "abc123"))
			.and(query_param("info", "core_form_dynamic_form"))
			.and(header("cookie", "MoodleSession=s3ss"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!([{
				"error": false,
				"data": { "submitted": false, "html": EDIT_FORM, "javascript": "" }
			}])))
			.expect(1)
			.mount(server)
			.await;
	}

	#[tokio::test]
	async fn rename_loads_then_submits_the_form() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/lib/ajax/service.php"))
			.and(body_string_contains("itemname=Tutorial+1"))
			.and(body_string_contains("sesskey=abc123"))
			.and(body_string_contains("grademax=10.00"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!([{
				"error": false,
				"data": { "submitted": true, "data": "{\"id\":17}" }
			}])))
			.with_priority(1)
			.expect(1)
			.mount(&server)
			.await;
		mount_form_load(&server).await;

		let client = AjaxClient::new(session(&server.uri())).unwrap();
		client.rename_grade_item("4", "17", "Tutorial 1").await.unwrap();
	}

	#[tokio::test]
	async fn rename_reports_validation_errors() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/lib/ajax/service.php"))
			.and(body_string_contains("itemname=Tutorial+1"))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!([{
				"error": false,
				"data": { "submitted": false, "html": "<div class=\"invalid-feedback\">Item name already in use</div>" }
			}])))
			.with_priority(1)
			.mount(&server)
			.await;
		mount_form_load(&server).await;

		let client = AjaxClient::new(session(&server.uri())).unwrap();
		let err = client.rename_grade_item("4", "17", "Tutorial 1").await.unwrap_err();
		assert!(err.to_string().contains("Item name already in use"));
	}

	#[tokio::test]
	async fn http_errors_surface() {
		let server = MockServer::start().await;
		Mock::given(method("POST")).respond_with(ResponseTemplate::new(503).set_body_string("maintenance")).mount(&server).await;

		let client = AjaxClient::new(session(&server.uri())).unwrap();
		let err = client.call(ADD_ITEM_FORM, "").await.unwrap_err();
		assert!(err.to_string().contains("503"));
	}
}
