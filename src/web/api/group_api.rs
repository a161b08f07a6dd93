use salvo::prelude::*;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::model::{Group, SubscriptionEntry, SubscriptionPatch};
use crate::web::aggregator_ref;

#[derive(Debug, Deserialize)]
struct NewGroup {
    name: String,
}

/// 远程订阅 `{url, expiry_days?}` 或内联订阅 `{name, content}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NewSubscription {
    Remote { url: String, expiry_days: Option<i64> },
    Inline { name: String, content: String },
}

pub(super) fn path_param(req: &Request, key: &str) -> Result<String> {
    req.param::<String>(key)
        .ok_or_else(|| PipelineError::InvalidInput(format!("missing path parameter `{}`", key)))
}

async fn json_body<T: for<'de> Deserialize<'de>>(req: &mut Request) -> Result<T> {
    req.parse_json::<T>()
        .await
        .map_err(|e| PipelineError::InvalidInput(e.to_string()))
}

#[handler]
async fn list_groups() -> Result<Json<Vec<Group>>> {
    Ok(Json(aggregator_ref().store().list_groups()?))
}

#[handler]
async fn create_group(req: &mut Request, res: &mut Response) -> Result<Json<Group>> {
    let body: NewGroup = json_body(req).await?;
    let (group, created) = aggregator_ref().store().create_group(&body.name)?;
    if created {
        res.status_code(StatusCode::CREATED);
    }
    Ok(Json(group))
}

#[handler]
async fn list_subscriptions(req: &mut Request) -> Result<Json<Vec<SubscriptionEntry>>> {
    let store = aggregator_ref().store();
    let group = store.group(&path_param(req, "group")?)?;
    Ok(Json(store.entries(&group)?))
}

#[handler]
async fn add_subscription(req: &mut Request, res: &mut Response) -> Result<Json<SubscriptionEntry>> {
    let group = path_param(req, "group")?;
    let store = aggregator_ref().store();
    let entry = match json_body::<NewSubscription>(req).await? {
        NewSubscription::Remote { url, expiry_days } => store.add_subscription(&group, &url, expiry_days)?,
        NewSubscription::Inline { name, content } => store.add_inline_subscription(&group, &name, &content)?,
    };
    res.status_code(StatusCode::CREATED);
    Ok(Json(entry))
}

#[handler]
async fn update_subscription(req: &mut Request) -> Result<Json<SubscriptionEntry>> {
    let group = path_param(req, "group")?;
    let key = path_param(req, "key")?;
    let patch: SubscriptionPatch = json_body(req).await?;
    Ok(Json(aggregator_ref().store().update_subscription(&group, &key, patch)?))
}

#[handler]
async fn delete_subscription(req: &mut Request) -> Result<Json<SubscriptionEntry>> {
    let group = path_param(req, "group")?;
    let key = path_param(req, "key")?;
    Ok(Json(aggregator_ref().store().delete_subscription(&group, &key)?))
}

pub fn group_router() -> Router {
    Router::with_path("groups")
        .get(list_groups)
        .post(create_group)
        .push(
            Router::with_path("{group}/subscriptions")
                .get(list_subscriptions)
                .post(add_subscription)
                .push(
                    Router::with_path("{key}")
                        .patch(update_subscription)
                        .delete(delete_subscription),
                ),
        )
}
