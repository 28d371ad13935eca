//! HTTP handlers for the coordinator
//!
//! Device-facing routes authenticate with the `X-Device-Key` header against
//! the credential hash in the registry. Dashboard routes (catalog, broadcast
//! and update management) sit behind the deployment's reverse proxy and carry
//! no device credential.

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use signage_gateway_core::models::{
    ContentRef, CreateBroadcastRequest, Device, HeartbeatRequest, PlaySchedule, RegisterRequest,
    SetConfigRequest, UpdateProgressReport, DEVICE_KEY_HEADER,
};
use signage_gateway_core::{ReleaseVersion, SignageError};

use crate::context::CoordinatorContext;

type ApiResult = Result<HttpResponse, SignageError>;

async fn authenticate(
    ctx: &CoordinatorContext,
    req: &HttpRequest,
    device_id: Uuid,
) -> Result<Device, SignageError> {
    let credential = req
        .headers()
        .get(DEVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            SignageError::Unauthorized(format!("missing {} header", DEVICE_KEY_HEADER))
        })?;
    ctx.registry.authenticate(device_id, credential).await
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "signage-gateway-coordinator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---- device lifecycle ----

#[post("/api/devices/register")]
async fn register_device(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<RegisterRequest>,
) -> ApiResult {
    let response = ctx.registry.register(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

#[get("/api/devices")]
async fn list_devices(ctx: web::Data<CoordinatorContext>) -> ApiResult {
    let summaries = ctx.registry.summaries().await?;
    Ok(HttpResponse::Ok().json(summaries))
}

#[delete("/api/devices/{device_id}")]
async fn delete_device(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    ctx.registry.soft_delete(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api/devices/{device_id}/heartbeat")]
async fn heartbeat(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Json<HeartbeatRequest>,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    let response = ctx.registry.heartbeat(&device, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/api/devices/{device_id}/resolve")]
async fn resolve_content(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    let decision = ctx.resolver.resolve(device.id, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(decision))
}

// ---- device config ----

#[get("/api/devices/{device_id}/config")]
async fn get_config(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    let response = ctx.registry.config_for_device(device.id).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/devices/{device_id}/config")]
async fn set_config(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
    body: web::Json<SetConfigRequest>,
) -> ApiResult {
    let body = body.into_inner();
    ctx.registry
        .set_config(path.into_inner(), body.key, body.value)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---- broadcasts ----

#[post("/api/broadcasts")]
async fn create_broadcast(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<CreateBroadcastRequest>,
) -> ApiResult {
    let response = ctx.broadcasts.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

#[post("/api/broadcasts/{broadcast_id}/cancel")]
async fn cancel_broadcast(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    ctx.broadcasts.cancel(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/api/devices/{device_id}/broadcasts")]
async fn active_broadcasts(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    let active = ctx.broadcasts.active_for_device(device.id).await?;
    Ok(HttpResponse::Ok().json(active))
}

#[post("/api/devices/{device_id}/broadcasts/{broadcast_id}/acknowledge")]
async fn acknowledge_broadcast(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
) -> ApiResult {
    let (device_id, broadcast_id) = path.into_inner();
    let device = authenticate(&ctx, &req, device_id).await?;
    let response = ctx.broadcasts.acknowledge(broadcast_id, device.id).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/devices/{device_id}/broadcasts/{broadcast_id}/displayed")]
async fn broadcast_displayed(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
) -> ApiResult {
    let (device_id, broadcast_id) = path.into_inner();
    let device = authenticate(&ctx, &req, device_id).await?;
    ctx.broadcasts.mark_displayed(broadcast_id, device.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---- catalog management ----

#[derive(Debug, Deserialize)]
struct AddVideoRequest {
    title: String,
    file_name: String,
    content_hash: String,
    size_bytes: u64,
    duration_secs: Option<u32>,
}

#[post("/api/videos")]
async fn add_video(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<AddVideoRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let video = ctx
        .catalog
        .add_video(
            body.title,
            body.file_name,
            body.content_hash,
            body.size_bytes,
            body.duration_secs,
        )
        .await?;
    Ok(HttpResponse::Created().json(video))
}

#[get("/api/videos")]
async fn list_videos(ctx: web::Data<CoordinatorContext>) -> ApiResult {
    Ok(HttpResponse::Ok().json(ctx.catalog.list_videos().await?))
}

#[get("/api/videos/{video_id}/download")]
async fn download_video(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<DownloadQuery>,
) -> ApiResult {
    let video_id = path.into_inner();
    authenticate(&ctx, &req, query.device_id).await?;
    let video = ctx.catalog.get_video(video_id).await?;

    let file_path = ctx.settings.media_dir.join(&video.file_name);
    let bytes = tokio::fs::read(&file_path)
        .await
        .map_err(|e| SignageError::Storage(format!("media file {}: {}", video.file_name, e)))?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", video.file_name),
        ))
        .body(bytes))
}

/// Device identity for authenticated downloads, where the body is a file
/// rather than JSON carrying the id
#[derive(Debug, Deserialize)]
struct DownloadQuery {
    device_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct CreatePlaylistRequest {
    name: String,
}

#[post("/api/playlists")]
async fn create_playlist(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<CreatePlaylistRequest>,
) -> ApiResult {
    let playlist = ctx.catalog.create_playlist(body.into_inner().name).await?;
    Ok(HttpResponse::Created().json(playlist))
}

#[get("/api/playlists/{playlist_id}/items")]
async fn playlist_items(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(ctx.catalog.playlist_items(path.into_inner()).await?))
}

#[derive(Debug, Deserialize)]
struct AddPlaylistItemRequest {
    video_id: Uuid,
}

#[post("/api/playlists/{playlist_id}/items")]
async fn add_playlist_item(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
    body: web::Json<AddPlaylistItemRequest>,
) -> ApiResult {
    let items = ctx
        .catalog
        .add_to_playlist(path.into_inner(), body.into_inner().video_id)
        .await?;
    Ok(HttpResponse::Ok().json(items))
}

#[delete("/api/playlists/{playlist_id}/items/{video_id}")]
async fn remove_playlist_item(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<(Uuid, Uuid)>,
) -> ApiResult {
    let (playlist_id, video_id) = path.into_inner();
    let items = ctx
        .catalog
        .remove_from_playlist(playlist_id, video_id)
        .await?;
    Ok(HttpResponse::Ok().json(items))
}

#[derive(Debug, Deserialize)]
struct ReorderPlaylistRequest {
    video_ids: Vec<Uuid>,
}

#[put("/api/playlists/{playlist_id}/order")]
async fn reorder_playlist(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
    body: web::Json<ReorderPlaylistRequest>,
) -> ApiResult {
    let items = ctx
        .catalog
        .reorder_playlist(path.into_inner(), body.into_inner().video_ids)
        .await?;
    Ok(HttpResponse::Ok().json(items))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    content: ContentRef,
    schedule: Option<PlaySchedule>,
}

#[post("/api/devices/{device_id}/assignment")]
async fn assign_content(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
    body: web::Json<AssignRequest>,
) -> ApiResult {
    let device_id = path.into_inner();
    ctx.registry.get(device_id).await?;
    let body = body.into_inner();
    let assignment = ctx
        .catalog
        .assign(device_id, body.content, body.schedule)
        .await?;
    Ok(HttpResponse::Created().json(assignment))
}

#[delete("/api/devices/{device_id}/assignment")]
async fn unassign_content(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    ctx.catalog.unassign(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---- groups ----

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: String,
    description: Option<String>,
}

#[post("/api/groups")]
async fn create_group(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<CreateGroupRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let group = ctx.registry.create_group(body.name, body.description).await?;
    Ok(HttpResponse::Created().json(group))
}

#[get("/api/groups")]
async fn list_groups(ctx: web::Data<CoordinatorContext>) -> ApiResult {
    Ok(HttpResponse::Ok().json(ctx.registry.list_groups().await?))
}

// ---- updates ----

#[derive(Debug, Deserialize)]
struct PublishUpdateRequest {
    version: ReleaseVersion,
    description: Option<String>,
    file_name: String,
    checksum: String,
    size_bytes: u64,
    #[serde(default)]
    is_critical: bool,
}

#[post("/api/updates")]
async fn publish_update(
    ctx: web::Data<CoordinatorContext>,
    body: web::Json<PublishUpdateRequest>,
) -> ApiResult {
    let body = body.into_inner();
    let update = ctx
        .updates
        .publish_update(
            body.version,
            body.description,
            body.file_name,
            body.checksum,
            body.size_bytes,
            body.is_critical,
        )
        .await?;
    Ok(HttpResponse::Created().json(update))
}

#[post("/api/updates/{update_id}/deploy")]
async fn deploy_update(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    let seeded = ctx.updates.deploy(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "seeded_devices": seeded })))
}

#[get("/api/devices/{device_id}/updates")]
async fn check_updates(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    let response = ctx.updates.check_updates(&device).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/api/devices/{device_id}/updates/{update_id}/progress")]
async fn report_update_progress(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<(Uuid, Uuid)>,
    body: web::Json<UpdateProgressReport>,
) -> ApiResult {
    let (device_id, update_id) = path.into_inner();
    let device = authenticate(&ctx, &req, device_id).await?;
    let row = ctx
        .updates
        .report_progress(device.id, update_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(row))
}

#[get("/api/updates/{update_id}/download")]
async fn download_update(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    query: web::Query<DownloadQuery>,
) -> ApiResult {
    let update_id = path.into_inner();
    authenticate(&ctx, &req, query.device_id).await?;
    let update = ctx.updates.get_update(update_id).await?;

    let file_path = ctx.settings.media_dir.join("updates").join(&update.file_name);
    let bytes = tokio::fs::read(&file_path)
        .await
        .map_err(|e| SignageError::Storage(format!("update file {}: {}", update.file_name, e)))?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(bytes))
}

// ---- screenshots ----

#[post("/api/devices/{device_id}/request-screenshot")]
async fn request_screenshot(
    ctx: web::Data<CoordinatorContext>,
    path: web::Path<Uuid>,
) -> ApiResult {
    // Devices notice the flag on their next config poll and upload once.
    ctx.registry
        .set_config(
            path.into_inner(),
            "screenshot_requested".to_string(),
            signage_gateway_core::models::ConfigValue::Bool(true),
        )
        .await?;
    Ok(HttpResponse::Accepted().finish())
}

#[post("/api/devices/{device_id}/screenshot")]
async fn upload_screenshot(
    ctx: web::Data<CoordinatorContext>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> ApiResult {
    let device = authenticate(&ctx, &req, path.into_inner()).await?;
    if body.is_empty() {
        return Err(SignageError::Validation("screenshot body is empty".into()));
    }

    let dir = ctx.settings.screenshot_dir.clone();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| SignageError::Storage(format!("screenshot dir: {}", e)))?;
    let file_name = format!("{}-{}.png", device.id, Utc::now().timestamp());
    tokio::fs::write(dir.join(&file_name), &body)
        .await
        .map_err(|e| SignageError::Storage(format!("screenshot write: {}", e)))?;

    // The upload clears the request flag.
    ctx.registry
        .set_config(
            device.id,
            "screenshot_requested".to_string(),
            signage_gateway_core::models::ConfigValue::Bool(false),
        )
        .await?;

    info!(device_id = %device.id, file = %file_name, "screenshot stored");
    Ok(HttpResponse::Created().json(serde_json::json!({ "file_name": file_name })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(register_device)
        .service(list_devices)
        .service(delete_device)
        .service(heartbeat)
        .service(resolve_content)
        .service(get_config)
        .service(set_config)
        .service(create_broadcast)
        .service(cancel_broadcast)
        .service(active_broadcasts)
        .service(acknowledge_broadcast)
        .service(broadcast_displayed)
        .service(add_video)
        .service(list_videos)
        .service(download_video)
        .service(create_playlist)
        .service(playlist_items)
        .service(add_playlist_item)
        .service(remove_playlist_item)
        .service(reorder_playlist)
        .service(assign_content)
        .service(unassign_content)
        .service(create_group)
        .service(list_groups)
        .service(publish_update)
        .service(deploy_update)
        .service(check_updates)
        .service(report_update_progress)
        .service(download_update)
        .service(request_screenshot)
        .service(upload_screenshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use signage_gateway_core::config::ServiceConfig;
    use signage_gateway_core::models::RegisterResponse;

    fn test_context() -> web::Data<CoordinatorContext> {
        web::Data::new(CoordinatorContext::in_memory(ServiceConfig::default()))
    }

    async fn register(ctx: &CoordinatorContext, serial: &str) -> RegisterResponse {
        ctx.registry
            .register(RegisterRequest {
                name: "screen".to_string(),
                serial: serial.to_string(),
                ip_address: None,
                software_version: None,
            })
            .await
            .unwrap()
    }

    #[actix_web::test]
    async fn health_reports_service_name() {
        let ctx = test_context();
        let app =
            test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["service"], "signage-gateway-coordinator");
    }

    #[actix_web::test]
    async fn heartbeat_requires_device_key() {
        let ctx = test_context();
        let app =
            test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;
        let registered = register(&ctx, "RPI-001").await;

        let uri = format!("/api/devices/{}/heartbeat", registered.device_id);
        let body = serde_json::json!({
            "current_content": null,
            "software_version": null,
            "ip_address": null,
        });

        let unauthenticated = test::TestRequest::post()
            .uri(&uri)
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, unauthenticated).await;
        assert_eq!(resp.status(), 401);

        let authenticated = test::TestRequest::post()
            .uri(&uri)
            .insert_header((DEVICE_KEY_HEADER, registered.credential.clone()))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, authenticated).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn resolve_returns_no_content_for_fresh_device() {
        let ctx = test_context();
        let app =
            test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;
        let registered = register(&ctx, "RPI-002").await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/devices/{}/resolve", registered.device_id))
            .insert_header((DEVICE_KEY_HEADER, registered.credential))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["decision"], "no_content");
    }

    #[actix_web::test]
    async fn broadcast_create_and_acknowledge_over_http() {
        let ctx = test_context();
        let app =
            test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;
        let registered = register(&ctx, "RPI-003").await;

        let req = test::TestRequest::post()
            .uri("/api/broadcasts")
            .set_json(serde_json::json!({
                "title": "drill",
                "message": "test",
                "video_id": null,
                "priority": 5,
                "duration_secs": 300,
                "target": { "target": "all_devices" },
                "activate_at": null,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);
        let created: serde_json::Value = test::read_body_json(resp).await;
        let broadcast_id = created["broadcast_id"].as_str().unwrap().to_string();
        assert_eq!(created["targeted_devices"], 1);

        let req = test::TestRequest::post()
            .uri(&format!(
                "/api/devices/{}/broadcasts/{}/acknowledge",
                registered.device_id, broadcast_id
            ))
            .insert_header((DEVICE_KEY_HEADER, registered.credential))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn invalid_priority_maps_to_400() {
        let ctx = test_context();
        let app =
            test::init_service(App::new().app_data(ctx.clone()).configure(configure)).await;
        register(&ctx, "RPI-004").await;

        let req = test::TestRequest::post()
            .uri("/api/broadcasts")
            .set_json(serde_json::json!({
                "title": "drill",
                "message": "test",
                "video_id": null,
                "priority": 9,
                "duration_secs": null,
                "target": { "target": "all_devices" },
                "activate_at": null,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
