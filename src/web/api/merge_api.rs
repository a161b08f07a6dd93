use salvo::prelude::*;

use super::group_api::path_param;
use crate::common::cache::LATEST_OUTPUTS;
use crate::error::Result;
use crate::service::aggregator::{GroupReport, RunSummary, TemplateChoice};
use crate::web::aggregator_ref;

fn run_options(req: &Request) -> (bool, TemplateChoice) {
    let force = req.query::<bool>("force").unwrap_or(false);
    let template = TemplateChoice::from_query(req.query::<String>("template").as_deref());
    (force, template)
}

#[handler]
async fn merge_group(req: &mut Request) -> Result<Json<GroupReport>> {
    let group = path_param(req, "group")?;
    let (force, template) = run_options(req);
    Ok(Json(aggregator_ref().merge_group(&group, template, force).await?))
}

/// 最近一次合并的完整 YAML 文本
#[handler]
async fn latest_output(req: &mut Request, res: &mut Response) {
    let group = req.param::<String>("group").unwrap_or_default();
    match LATEST_OUTPUTS.get(&group) {
        Some(output) => res.render(Text::Plain(output.content)),
        None => {
            res.status_code(StatusCode::NOT_FOUND);
            res.render(Text::Plain(format!("no merged output for group `{}`", group)));
        }
    }
}

#[handler]
async fn run_all(req: &mut Request) -> Result<Json<RunSummary>> {
    let (force, template) = run_options(req);
    Ok(Json(aggregator_ref().run_all(force, template).await?))
}

pub fn merge_router() -> Router {
    Router::new()
        .push(Router::with_path("groups/{group}/merge").post(merge_group))
        .push(Router::with_path("groups/{group}/latest").get(latest_output))
        .push(Router::with_path("run").post(run_all))
}
