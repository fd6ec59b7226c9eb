use rocket::Route;

mod admin;
mod auditor;
mod public;
mod voter;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(admin::routes());
    routes.extend(auditor::routes());
    routes.extend(public::routes());
    routes.extend(voter::routes());
    routes
}
