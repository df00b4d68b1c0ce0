//! Network destination: GitLab REST API v4.
//!
//! Creation endpoints always open issues and activate milestones, so closed
//! states are applied with a follow-up `state_event`. Authorship is carried
//! by impersonating the author with the `Sudo` header, which needs an admin
//! token.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::dest::Destination;
use crate::error::{MigrateError, Result};
use crate::model::{
    CreatedIssue, IssueState, MilestoneId, MilestoneState, NewIssue, NewMilestone, Note,
    ProjectId, UserId,
};

const PAGE_SIZE: usize = 100;

pub struct GitlabApi {
    agent: ureq::Agent,
    base: String,
    token: String,
}

impl GitlabApi {
    /// `url` is the GitLab root, e.g. `https://gitlab.example.org`.
    pub fn new(url: &str, token: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .build();
        Self {
            agent,
            base: format!("{}/api/v4", url.trim_end_matches('/')),
            token: token.into(),
        }
    }

    fn request(&self, method: &str, path: &str, sudo: Option<UserId>) -> ureq::Request {
        let request = self
            .agent
            .request(method, &format!("{}{path}", self.base))
            .set("PRIVATE-TOKEN", &self.token);
        match sudo {
            Some(user) => request.set("Sudo", &user.to_string()),
            None => request,
        }
    }

    fn send(&self, request: ureq::Request, body: Option<Value>) -> Result<Value> {
        let what = format!("{} {}", request.method(), request.url());
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        match result {
            Ok(response) if response.status() == 204 => Ok(Value::Null),
            Ok(response) => Ok(response.into_json()?),
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(MigrateError::UnexpectedResponse(
                    what,
                    format!("http status {code}: {detail}"),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn upload(&self, project: ProjectId, filename: &str, payload: &[u8]) -> Result<Value> {
        let (content_type, body) = multipart_file(filename, payload);
        let request = self
            .request("POST", &format!("/projects/{project}/uploads"), None)
            .set("Content-Type", &content_type);
        let what = format!("POST {}", request.url());
        match request.send_bytes(&body) {
            Ok(response) => Ok(response.into_json()?),
            Err(ureq::Error::Status(code, _)) => Err(MigrateError::UnexpectedResponse(
                what,
                format!("http status {code}"),
            )),
            Err(err) => Err(err.into()),
        }
    }
}

/// Build a single-file `multipart/form-data` body under the field name `file`.
pub fn multipart_file(filename: &str, payload: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("trac2lab-{}", Uuid::new_v4().simple());
    let filename = filename.replace('"', "%22");
    let mut body = Vec::with_capacity(payload.len() + 256);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

fn id_of(value: &Value, key: &str, what: &str) -> Result<u64> {
    value.get(key).and_then(Value::as_u64).ok_or_else(|| {
        MigrateError::UnexpectedResponse(what.to_string(), format!("missing numeric `{key}`"))
    })
}

impl Destination for GitlabApi {
    fn project_id(&self, name: &str) -> Result<ProjectId> {
        let search = name.rsplit('/').next().unwrap_or(name);
        let request = self
            .request("GET", "/projects", None)
            .query("search", search)
            .query("per_page", &PAGE_SIZE.to_string());
        let projects = self.send(request, None)?;
        projects
            .as_array()
            .into_iter()
            .flatten()
            .find(|p| {
                p.get("path_with_namespace").and_then(Value::as_str) == Some(name)
                    || p.get("name").and_then(Value::as_str) == Some(name)
            })
            .map(|p| id_of(p, "id", "GET /projects"))
            .transpose()?
            .ok_or_else(|| MigrateError::ProjectNotFound(name.to_string()))
    }

    fn user_id(&self, username: &str) -> Result<Option<UserId>> {
        let request = self.request("GET", "/users", None).query("username", username);
        let users = self.send(request, None)?;
        users
            .as_array()
            .and_then(|users| users.first())
            .map(|user| id_of(user, "id", "GET /users"))
            .transpose()
    }

    fn create_milestone(
        &self,
        project: ProjectId,
        milestone: &NewMilestone,
    ) -> Result<MilestoneId> {
        let mut body = json!({
            "title": milestone.title,
            "description": milestone.description,
        });
        if let Some(due) = milestone.due_date {
            body["due_date"] = json!(due.format("%Y-%m-%d").to_string());
        }
        let path = format!("/projects/{project}/milestones");
        let created = self.send(self.request("POST", &path, None), Some(body))?;
        let id = id_of(&created, "id", &path)?;

        if milestone.state == MilestoneState::Closed {
            let close = self.request("PUT", &format!("{path}/{id}"), None);
            self.send(close, Some(json!({ "state_event": "close" })))?;
        }
        Ok(id)
    }

    fn update_milestone(
        &self,
        project: ProjectId,
        id: MilestoneId,
        milestone: &NewMilestone,
    ) -> Result<()> {
        let state_event = match milestone.state {
            MilestoneState::Active => "activate",
            MilestoneState::Closed => "close",
        };
        let mut body = json!({
            "description": milestone.description,
            "state_event": state_event,
        });
        if let Some(due) = milestone.due_date {
            body["due_date"] = json!(due.format("%Y-%m-%d").to_string());
        }
        let path = format!("/projects/{project}/milestones/{id}");
        self.send(self.request("PUT", &path, None), Some(body))?;
        Ok(())
    }

    fn find_milestone(&self, project: ProjectId, title: &str) -> Result<Option<MilestoneId>> {
        let path = format!("/projects/{project}/milestones");
        let request = self.request("GET", &path, None).query("title", title);
        let milestones = self.send(request, None)?;
        milestones
            .as_array()
            .into_iter()
            .flatten()
            .find(|m| m.get("title").and_then(Value::as_str) == Some(title))
            .map(|m| id_of(m, "id", &path))
            .transpose()
    }

    fn clear_issues(&self, project: ProjectId) -> Result<usize> {
        let path = format!("/projects/{project}/issues");
        let mut removed = 0;
        loop {
            let request = self
                .request("GET", &path, None)
                .query("scope", "all")
                .query("per_page", &PAGE_SIZE.to_string());
            let page = self.send(request, None)?;
            let iids = page
                .as_array()
                .into_iter()
                .flatten()
                .map(|issue| id_of(issue, "iid", &path))
                .collect::<Result<Vec<_>>>()?;
            if iids.is_empty() {
                return Ok(removed);
            }
            for iid in iids {
                self.send(self.request("DELETE", &format!("{path}/{iid}"), None), None)?;
                removed += 1;
            }
        }
    }

    fn create_issue(&self, project: ProjectId, issue: &NewIssue) -> Result<CreatedIssue> {
        let mut body = json!({
            "title": issue.title,
            "description": issue.description,
            "labels": issue.labels.join(","),
            "created_at": issue.created_at.to_rfc3339(),
        });
        if let Some(iid) = issue.iid {
            body["iid"] = json!(iid);
        }
        if let Some(assignee) = issue.assignee {
            body["assignee_ids"] = json!([assignee]);
        }
        if let Some(milestone) = issue.milestone {
            body["milestone_id"] = json!(milestone);
        }

        let path = format!("/projects/{project}/issues");
        let created = self.send(self.request("POST", &path, Some(issue.author)), Some(body))?;
        let created = CreatedIssue {
            id: id_of(&created, "id", &path)?,
            iid: id_of(&created, "iid", &path)?,
        };

        if issue.state == Some(IssueState::Closed) {
            let close = self.request("PUT", &format!("{path}/{}", created.iid), None);
            self.send(
                close,
                Some(json!({
                    "state_event": "close",
                    "updated_at": issue.updated_at.to_rfc3339(),
                })),
            )?;
        }
        debug!(iid = created.iid, "created issue over api");
        Ok(created)
    }

    fn comment_issue(&self, project: ProjectId, issue: &CreatedIssue, note: &Note) -> Result<u64> {
        let mut body = note.body.clone();
        if let Some(attachment) = &note.attachment {
            let uploaded = self.upload(project, &attachment.filename, &attachment.payload)?;
            let markdown = uploaded
                .get("markdown")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| format!("`{}`", attachment.filename));
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&markdown);
        }

        let path = format!("/projects/{project}/issues/{}/notes", issue.iid);
        let created = self.send(
            self.request("POST", &path, Some(note.author)),
            Some(json!({
                "body": body,
                "created_at": note.created_at.to_rfc3339(),
            })),
        )?;
        id_of(&created, "id", &path)
    }

    fn save_wiki_attachment(
        &self,
        project: ProjectId,
        name: &str,
        payload: &[u8],
    ) -> Result<String> {
        let uploaded = self.upload(project, name, payload)?;
        uploaded
            .get("full_path")
            .or_else(|| uploaded.get("url"))
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                MigrateError::UnexpectedResponse(
                    format!("POST /projects/{project}/uploads"),
                    "upload response has no url".into(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use chrono::{TimeZone, Utc};

    #[test]
    fn multipart_body_wraps_payload_in_boundary() {
        let (content_type, body) = multipart_file("bug \"1\".png", b"PNG");
        let boundary = content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.contains("filename=\"bug %221%22.png\""));
        assert!(text.contains("\r\n\r\nPNG\r\n"));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn base_url_is_normalized() {
        let api = GitlabApi::new("https://gitlab.example.org/", "token");
        assert_eq!(api.base, "https://gitlab.example.org/api/v4");
    }

    #[test]
    fn id_of_reports_missing_field() {
        let err = id_of(&json!({ "iid": 3 }), "id", "POST /x").unwrap_err();
        assert!(matches!(err, MigrateError::UnexpectedResponse(_, _)));
        assert_eq!(id_of(&json!({ "id": 9 }), "id", "POST /x").unwrap(), 9);
    }

    fn closed_issue(author: UserId) -> NewIssue {
        let at = Utc.with_ymd_and_hms(2011, 3, 4, 5, 6, 7).unwrap();
        NewIssue {
            iid: Some(5),
            title: "Crash".into(),
            description: "boom".into(),
            state: Some(IssueState::Closed),
            labels: vec!["bug".into(), "core".into()],
            assignee: Some(4),
            author,
            created_at: at,
            updated_at: at,
            milestone: None,
        }
    }

    #[test]
    fn closed_issue_is_created_as_author_then_closed() {
        let server = FakeServer::start(vec![
            (201, json!({ "id": 40, "iid": 5 })),
            (200, json!({ "id": 40, "iid": 5, "state": "closed" })),
        ]);
        let api = GitlabApi::new(&server.url, "secret");

        let created = api.create_issue(9, &closed_issue(3)).unwrap();
        assert_eq!(created, CreatedIssue { id: 40, iid: 5 });

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        let create = &requests[0];
        assert_eq!(create.method, "POST");
        assert_eq!(create.target, "/api/v4/projects/9/issues");
        assert_eq!(create.header("PRIVATE-TOKEN"), Some("secret"));
        assert_eq!(create.header("Sudo"), Some("3"));
        let body = create.json();
        assert_eq!(body["iid"], 5);
        assert_eq!(body["labels"], "bug,core");
        assert_eq!(body["assignee_ids"], json!([4]));

        let close = &requests[1];
        assert_eq!(close.method, "PUT");
        assert_eq!(close.target, "/api/v4/projects/9/issues/5");
        assert_eq!(close.json()["state_event"], "close");
    }

    #[test]
    fn clear_issues_deletes_until_listing_is_empty() {
        let server = FakeServer::start(vec![
            (200, json!([{ "id": 11, "iid": 1 }, { "id": 12, "iid": 2 }])),
            (204, Value::Null),
            (204, Value::Null),
            (200, json!([])),
        ]);
        let api = GitlabApi::new(&server.url, "secret");

        assert_eq!(api.clear_issues(9).unwrap(), 2);
        let requests = server.requests();
        let calls: Vec<(&str, &str)> = requests
            .iter()
            .map(|r| (r.method.as_str(), r.target.split('?').next().unwrap_or_default()))
            .collect();
        assert_eq!(
            calls,
            [
                ("GET", "/api/v4/projects/9/issues"),
                ("DELETE", "/api/v4/projects/9/issues/1"),
                ("DELETE", "/api/v4/projects/9/issues/2"),
                ("GET", "/api/v4/projects/9/issues"),
            ]
        );
        assert!(requests[0].target.contains("scope=all"));
    }

    #[test]
    fn reused_milestone_is_closed_in_place() {
        let server = FakeServer::start(vec![(200, json!({ "id": 7 }))]);
        let api = GitlabApi::new(&server.url, "secret");
        let milestone = NewMilestone {
            title: "1.0".into(),
            description: "done".into(),
            state: MilestoneState::Closed,
            due_date: None,
        };

        api.update_milestone(9, 7, &milestone).unwrap();
        let requests = server.requests();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].target, "/api/v4/projects/9/milestones/7");
        assert_eq!(requests[0].json()["state_event"], "close");
        assert_eq!(requests[0].json()["description"], "done");
    }

    #[test]
    fn error_status_is_an_unexpected_response() {
        let server = FakeServer::start(vec![(403, json!({ "message": "403 Forbidden" }))]);
        let api = GitlabApi::new(&server.url, "secret");

        let err = api.user_id("alice").unwrap_err();
        match err {
            MigrateError::UnexpectedResponse(what, detail) => {
                assert!(what.starts_with("GET "));
                assert!(detail.contains("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
