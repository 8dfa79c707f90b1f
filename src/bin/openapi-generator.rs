//! Emit the OpenAPI document to stdout, for frontend codegen and CI diffs.

use utoipa::OpenApi;

use wavecast_back::services::documentation::ApiDoc;

fn main() {
    match ApiDoc::openapi().to_pretty_json() {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("failed to render OpenAPI document: {err}");
            std::process::exit(1);
        }
    }
}
