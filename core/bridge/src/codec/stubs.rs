//! Canned answers for the DOM, CSS, Page and Network domains.
//!
//! A DevTools front-end refuses to show the sources panel unless these
//! domains answer something plausible. The bridge has no document, so every
//! answer describes an empty page whose only resources are the scripts the
//! engine told us about.

use super::{ScriptTable, Stub};
use serde_json::{Value, json};

/// What a stub answer may refer to.
#[derive(Debug, Clone, Copy)]
pub struct StubContext<'a> {
    /// Frame id, the context id as a string.
    pub frame_id: &'a str,
    /// URL of the script the page is paused in, if any.
    pub url: &'a str,
    /// Scripts announced on this page.
    pub scripts: &'a ScriptTable,
}

/// Builds the `result` object for `stub`.
#[must_use]
pub fn stub_result(stub: &Stub, cx: StubContext<'_>) -> Value {
    match stub {
        Stub::GetDocument => json!({
            "root": {
                "nodeId": 1,
                "nodeType": 9,
                "nodeName": "#document",
                "localName": "",
                "nodeValue": "",
                "childNodeCount": 1,
                "children": [{
                    "nodeId": 2,
                    "nodeType": 1,
                    "nodeName": "HTML",
                    "localName": "html",
                    "nodeValue": "",
                    "childNodeCount": 0,
                    "children": [],
                    "attributes": [],
                }],
                "documentURL": cx.url,
                "baseURL": cx.url,
                "xmlVersion": "",
            }
        }),
        Stub::GetResourceTree => {
            let resources: Vec<Value> = cx
                .scripts
                .iter()
                .map(|script| {
                    json!({
                        "url": script.url,
                        "type": "Script",
                        "mimeType": "application/javascript",
                    })
                })
                .collect();
            json!({
                "frameTree": {
                    "frame": {
                        "id": cx.frame_id,
                        "loaderId": cx.frame_id,
                        "url": cx.url,
                        "mimeType": "text/html",
                        "securityOrigin": "",
                    },
                    "resources": resources,
                }
            })
        }
        Stub::GetResourceContent { url } => {
            let content = cx
                .scripts
                .by_url(url)
                .and_then(|script| script.source.as_deref())
                .unwrap_or_default();
            json!({ "content": content, "base64Encoded": false })
        }
        Stub::GetNavigationHistory => json!({
            "currentIndex": 0,
            "entries": [{ "id": 0, "url": cx.url, "title": cx.url }],
        }),
        Stub::GetSupportedCssProperties => json!({ "cssProperties": [] }),
        Stub::GetResponseBody => json!({ "body": "", "base64Encoded": false }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_tree_lists_known_scripts() {
        let mut scripts = ScriptTable::new();
        scripts.set_source("b.js", "b()".into());
        scripts.set_source("a.js", "a()".into());
        let cx = StubContext {
            frame_id: "4",
            url: "a.js",
            scripts: &scripts,
        };

        let tree = stub_result(&Stub::GetResourceTree, cx);
        assert_eq!(tree["frameTree"]["frame"]["id"], "4");
        let urls: Vec<_> = tree["frameTree"]["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["url"].as_str().unwrap())
            .collect();
        assert_eq!(urls, ["a.js", "b.js"]);

        let content = stub_result(
            &Stub::GetResourceContent { url: "b.js".into() },
            cx,
        );
        assert_eq!(content["content"], "b()");
        let missing = stub_result(
            &Stub::GetResourceContent { url: "zz.js".into() },
            cx,
        );
        assert_eq!(missing["content"], "");
    }
}
