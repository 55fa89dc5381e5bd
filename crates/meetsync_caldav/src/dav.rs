//! WebDAV / CalDAV request bodies and `multistatus` parsing.
//!
//! Element matching goes by local name only. Servers disagree on prefixes
//! (`D:`, `d:`, default namespaces) but never on the local names.

use chrono::{DateTime, Utc};
use meetsync_common::{parse_error, MeetsyncResult};
use roxmltree::{Document, Node};

/// One `<response>` of a multistatus answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DavResponse {
    pub href: String,
    /// Status of the response itself, or of its first successful propstat.
    pub status: Option<u16>,
    pub etag: Option<String>,
    pub calendar_data: Option<String>,
    pub display_name: Option<String>,
    pub is_calendar: bool,
    /// Component names of `supported-calendar-component-set`, empty when the
    /// server did not report the property.
    pub components: Vec<String>,
    pub color: Option<String>,
    /// `None` when the privilege set was not reported.
    pub can_write: Option<bool>,
    pub current_user_principal: Option<String>,
    pub calendar_home: Option<String>,
}

impl DavResponse {
    pub fn is_missing(&self) -> bool {
        matches!(self.status, Some(404) | Some(410))
    }

    /// RFC 6578 marks a truncated `sync-collection` answer with a 507
    /// response for the collection itself.
    pub fn is_truncated(&self) -> bool {
        self.status == Some(507)
    }

    /// Calendars that can hold events. Collections without a component set
    /// accept everything.
    pub fn holds_events(&self) -> bool {
        self.is_calendar
            && (self.components.is_empty()
                || self.components.iter().any(|c| c.eq_ignore_ascii_case("VEVENT")))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Multistatus {
    pub responses: Vec<DavResponse>,
    pub sync_token: Option<String>,
}

impl Multistatus {
    /// More changes are waiting behind [`Multistatus::sync_token`].
    pub fn is_truncated(&self) -> bool {
        self.responses.iter().any(DavResponse::is_truncated)
    }
}

pub const PROPFIND_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:current-user-principal/>
  </D:prop>
</D:propfind>"#;

pub const PROPFIND_CALENDAR_HOME: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <C:calendar-home-set/>
  </D:prop>
</D:propfind>"#;

pub const PROPFIND_CALENDARS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:A="http://apple.com/ns/ical/">
  <D:prop>
    <D:displayname/>
    <D:resourcetype/>
    <D:current-user-privilege-set/>
    <C:supported-calendar-component-set/>
    <A:calendar-color/>
  </D:prop>
</D:propfind>"#;

/// UTC timestamp in the basic format CalDAV time ranges use.
pub fn caldav_time(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `calendar-query` for VEVENTs overlapping `[start, end)`. With `expand` the
/// server returns recurring events as individual instances.
pub fn calendar_query(start: DateTime<Utc>, end: DateTime<Utc>, expand: bool) -> String {
    let (start, end) = (caldav_time(start), caldav_time(end));
    let data = if expand {
        format!(
            r#"<C:calendar-data><C:expand start="{}" end="{}"/></C:calendar-data>"#,
            start, end
        )
    } else {
        "<C:calendar-data/>".to_string()
    };
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:getetag/>
    {data}
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      <C:comp-filter name="VEVENT">
        <C:time-range start="{start}" end="{end}"/>
      </C:comp-filter>
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#
    )
}

pub fn free_busy_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<C:free-busy-query xmlns:C="urn:ietf:params:xml:ns:caldav">
  <C:time-range start="{}" end="{}"/>
</C:free-busy-query>"#,
        caldav_time(start),
        caldav_time(end)
    )
}

/// RFC 6578 `sync-collection`. An empty token asks for the full listing.
pub fn sync_collection(sync_token: Option<&str>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<D:sync-collection xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:sync-token>{}</D:sync-token>
  <D:sync-level>1</D:sync-level>
  <D:prop>
    <D:getetag/>
    <C:calendar-data/>
  </D:prop>
</D:sync-collection>"#,
        escape(sync_token.unwrap_or_default())
    )
}

pub fn calendar_multiget(hrefs: &[String]) -> String {
    let hrefs: String = hrefs
        .iter()
        .map(|h| format!("\n  <D:href>{}</D:href>", escape(h)))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:getetag/>
    <C:calendar-data/>
  </D:prop>{}
</C:calendar-multiget>"#,
        hrefs
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn parse_multistatus(body: &str) -> MeetsyncResult<Multistatus> {
    let doc = Document::parse(body)
        .map_err(|e| parse_error(format!("invalid multistatus body: {}", e)))?;
    let root = doc.root_element();
    if !is(&root, "multistatus") {
        return Err(parse_error(format!(
            "expected multistatus, got {}",
            root.tag_name().name()
        )));
    }

    Ok(Multistatus {
        responses: root
            .children()
            .filter(|n| is(n, "response"))
            .map(parse_response)
            .collect(),
        sync_token: child(root, "sync-token").and_then(text),
    })
}

fn parse_response(node: Node) -> DavResponse {
    let mut response = DavResponse {
        href: child(node, "href").and_then(text).unwrap_or_default(),
        status: child(node, "status").and_then(text).and_then(|s| parse_status(&s)),
        ..Default::default()
    };

    for propstat in node.children().filter(|n| is(n, "propstat")) {
        let status = child(propstat, "status").and_then(text).and_then(|s| parse_status(&s));
        // Missing properties come back as empty elements under a 404 propstat
        if status.is_some_and(|s| !(200..300).contains(&s)) {
            continue;
        }
        if response.status.is_none() {
            response.status = status;
        }
        if let Some(prop) = child(propstat, "prop") {
            read_props(prop, &mut response);
        }
    }
    response
}

fn read_props(prop: Node, response: &mut DavResponse) {
    for node in prop.children().filter(Node::is_element) {
        match node.tag_name().name() {
            "getetag" => response.etag = text(node),
            "calendar-data" => {
                let data: String = node
                    .descendants()
                    .filter(Node::is_text)
                    .filter_map(|n| n.text())
                    .collect();
                if !data.trim().is_empty() {
                    response.calendar_data = Some(data);
                }
            }
            "displayname" => response.display_name = text(node),
            "resourcetype" => response.is_calendar = child(node, "calendar").is_some(),
            "supported-calendar-component-set" => {
                response.components = node
                    .children()
                    .filter(|n| is(n, "comp"))
                    .filter_map(|n| n.attribute("name").map(str::to_string))
                    .collect();
            }
            "calendar-color" => response.color = text(node).map(|c| normalize_color(&c)),
            "current-user-privilege-set" => {
                response.can_write = Some(node.descendants().any(|n| {
                    n.is_element()
                        && matches!(
                            n.tag_name().name(),
                            "write" | "write-content" | "all"
                        )
                }));
            }
            "current-user-principal" => {
                response.current_user_principal = child(node, "href").and_then(text)
            }
            "calendar-home-set" => response.calendar_home = child(node, "href").and_then(text),
            _ => {}
        }
    }
}

/// `HTTP/1.1 404 Not Found` -> 404
fn parse_status(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

// Apple reports #RRGGBBAA
fn normalize_color(color: &str) -> String {
    if color.starts_with('#') && color.len() == 9 && color.is_ascii() {
        color[..7].to_string()
    } else {
        color.to_string()
    }
}

fn is(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is(n, name))
}

fn text(node: Node) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
