mod common;

use axum::http::StatusCode;
use classifieds_api::error::GENERIC_REJECTION;
use classifieds_api::rate_limit::RateLimitPolicy;
use common::{Client, TestApp, png_bytes};

const BIKE: [(&str, &str); 5] = [
    ("title", "Mountain bike"),
    ("description", "Barely used, 21 gears, new tyres"),
    ("category_id", "2"),
    ("price", "250"),
    ("location", "Lisbon"),
];

async fn post_bike(browser: &mut Client, image: Option<(&str, Vec<u8>)>) -> common::Resp {
    let token = browser.csrf().await;
    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    browser.post_multipart("/listings", &fields, image).await
}

#[tokio::test]
async fn owner_posts_views_and_deletes_a_listing() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;

    let created = post_bike(&mut seller, Some(("bike.png", png_bytes()))).await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.text);
    let id = created.body["id"].as_i64().unwrap();
    assert_eq!(app.db.count_listings().unwrap(), 1);

    let detail = seller.get(&format!("/listings/{id}")).await;
    assert_eq!(detail.status, StatusCode::OK);
    assert_eq!(detail.body["listing"]["title"], "Mountain bike");
    assert_eq!(detail.body["listing"]["status"], "active");
    let image = detail.body["listing"]["image_filename"].as_str().unwrap().to_string();
    assert!(image.ends_with(".png"));
    assert!(app.config.upload_dir.join(&image).exists());

    let mine = seller.get("/me/listings").await;
    assert_eq!(mine.body.as_array().unwrap().len(), 1);

    let token = seller.csrf().await;
    let deleted = seller
        .post_form(&format!("/listings/{id}/delete"), &[("csrf_token", token.as_str())])
        .await;
    assert_eq!(deleted.status, StatusCode::OK, "{}", deleted.text);
    assert_eq!(app.db.count_listings().unwrap(), 0);
    assert!(!app.config.upload_dir.join(&image).exists());
}

#[tokio::test]
async fn stale_csrf_token_leaves_row_count_unchanged() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;

    let mut fields = vec![("csrf_token", "0000")];
    fields.extend_from_slice(&BIKE);
    let resp = seller.post_multipart("/listings", &fields, None).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error(), GENERIC_REJECTION);
    assert_eq!(app.db.count_listings().unwrap(), 0);

    let id = post_bike(&mut seller, None).await.body["id"].as_i64().unwrap();
    let resp = seller
        .post_form(&format!("/listings/{id}/delete"), &[("csrf_token", "stale")])
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(app.db.count_listings().unwrap(), 1);
}

#[tokio::test]
async fn delete_token_is_not_accepted_from_query_string() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;
    let id = post_bike(&mut seller, None).await.body["id"].as_i64().unwrap();

    let token = seller.csrf().await;
    let resp = seller
        .post_form(&format!("/listings/{id}/delete?csrf_token={token}"), &[])
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(app.db.count_listings().unwrap(), 1);
}

#[tokio::test]
async fn strangers_cannot_touch_someone_elses_listing() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;
    let id = post_bike(&mut seller, None).await.body["id"].as_i64().unwrap();

    let mut stranger = app.client();
    stranger.sign_up("stranger").await;
    let token = stranger.csrf().await;

    let resp = stranger
        .post_form(&format!("/listings/{id}/delete"), &[("csrf_token", token.as_str())])
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error(), "Ad not found or access denied");

    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    let resp = stranger
        .post_multipart(&format!("/listings/{id}"), &fields, None)
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(app.db.count_listings().unwrap(), 1);
}

#[tokio::test]
async fn owner_updates_listing_and_marks_it_sold() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;
    let id = post_bike(&mut seller, None).await.body["id"].as_i64().unwrap();

    let token = seller.csrf().await;
    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    fields.push(("status", "sold"));
    fields[1] = ("title", "Mountain bike (sold)");
    let resp = seller
        .post_multipart(&format!("/listings/{id}"), &fields, None)
        .await;
    assert_eq!(resp.status, StatusCode::OK, "{}", resp.text);

    let sold = seller.get("/me/listings?status=sold").await;
    let sold = sold.body.as_array().unwrap();
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0]["title"], "Mountain bike (sold)");

    // Sold ads are no longer public.
    let mut visitor = app.client();
    assert_eq!(
        visitor.get(&format!("/listings/{id}")).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn invalid_listing_fields_are_reported() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;
    let token = seller.csrf().await;

    let resp = seller
        .post_multipart(
            "/listings",
            &[
                ("csrf_token", token.as_str()),
                ("title", "<script>alert(1)</script>"),
                ("description", "short"),
                ("category_id", "99"),
            ],
            Some(("evil.php", png_bytes())),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.body["fields"]["title"], "Invalid characters in title");
    assert!(resp.body["fields"]["description"].is_string());
    assert_eq!(app.db.count_listings().unwrap(), 0);

    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    let resp = seller
        .post_multipart("/listings", &fields, Some(("evil.php", png_bytes())))
        .await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.body["fields"]["image"], "Executable files are not allowed");

    fields[3] = ("category_id", "99");
    let resp = seller.post_multipart("/listings", &fields, None).await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(resp.body["fields"]["category_id"].is_string());
    assert_eq!(app.db.count_listings().unwrap(), 0);
}

#[tokio::test]
async fn posting_is_rate_limited_per_user() {
    let app = TestApp::with_config(|c| c.rate_limits.post_listing = RateLimitPolicy::new(2, 86_400));
    let mut seller = app.client();
    seller.sign_up("seller").await;

    assert_eq!(post_bike(&mut seller, None).await.status, StatusCode::CREATED);
    assert_eq!(post_bike(&mut seller, None).await.status, StatusCode::CREATED);
    let third = post_bike(&mut seller, None).await;
    assert_eq!(third.status, StatusCode::FORBIDDEN);
    assert_eq!(third.error(), GENERIC_REJECTION);
    assert_eq!(app.db.count_listings().unwrap(), 2);
}

#[tokio::test]
async fn anonymous_posting_is_redirected_to_login() {
    let app = TestApp::new();
    let mut visitor = app.client();
    let token = visitor.csrf().await;

    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    let resp = visitor.post_multipart("/listings", &fields, None).await;
    assert_eq!(resp.status, StatusCode::SEE_OTHER);
    assert_eq!(resp.location(), Some("/login?redirect=%2Flistings"));
    assert_eq!(app.db.count_listings().unwrap(), 0);
}

#[tokio::test]
async fn views_count_ignores_the_owner() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;
    let id = post_bike(&mut seller, None).await.body["id"].as_i64().unwrap();
    let uri = format!("/listings/{id}");

    assert_eq!(seller.get(&uri).await.body["listing"]["views_count"], 0);

    let mut visitor = app.client();
    assert_eq!(visitor.get(&uri).await.body["listing"]["views_count"], 1);
    assert_eq!(visitor.get(&uri).await.body["listing"]["views_count"], 2);
    assert_eq!(seller.get(&uri).await.body["listing"]["views_count"], 2);
}

#[tokio::test]
async fn search_paginates_active_listings() {
    let app = TestApp::new();
    let mut seller = app.client();
    seller.sign_up("seller").await;

    for _ in 0..10 {
        assert_eq!(post_bike(&mut seller, None).await.status, StatusCode::CREATED);
    }
    // A second seller pushes the total past one page.
    let mut other = app.client();
    other.sign_up("other").await;
    for _ in 0..3 {
        assert_eq!(post_bike(&mut other, None).await.status, StatusCode::CREATED);
    }

    let mut visitor = app.client();
    let first = visitor.get("/listings?keyword=bike").await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["total"], 13);
    assert_eq!(first.body["per_page"], 12);
    assert_eq!(first.body["total_pages"], 2);
    assert_eq!(first.body["listings"].as_array().unwrap().len(), 12);

    let second = visitor.get("/listings?keyword=bike&page=2&sort=price_low").await;
    assert_eq!(second.body["page"], 2);
    assert_eq!(second.body["listings"].as_array().unwrap().len(), 1);

    let none = visitor.get("/listings?keyword=sofa").await;
    assert_eq!(none.body["total"], 0);

    let home = visitor.get("/").await;
    assert_eq!(home.body["featured"].as_array().unwrap().len(), 6);
    let categories = home.body["categories"].as_array().unwrap();
    let vehicles = categories.iter().find(|c| c["id"] == 2).unwrap();
    assert_eq!(vehicles["listing_count"], 13);
}

#[tokio::test]
async fn rejected_fields_do_not_spend_posting_quota() {
    let app = TestApp::with_config(|c| c.rate_limits.post_listing = RateLimitPolicy::new(1, 86_400));
    let mut seller = app.client();
    seller.sign_up("seller").await;

    let token = seller.csrf().await;
    let mut fields = vec![("csrf_token", token.as_str())];
    fields.extend_from_slice(&BIKE);
    fields[2] = ("description", "short");
    let resp = seller.post_multipart("/listings", &fields, None).await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(post_bike(&mut seller, None).await.status, StatusCode::CREATED);
    assert_eq!(post_bike(&mut seller, None).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.db.count_listings().unwrap(), 1);
}
