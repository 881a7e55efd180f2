//! HTML for the upload form and the result page.

use crate::server::types::PredictionView;
use html_escape::encode_safe as escape;

const STYLE: &str = "body{font-family:sans-serif;max-width:40rem;margin:2rem auto;padding:0 1rem}\
.error{color:#b00020}.crack{color:#b00020}.no-crack{color:#1b5e20}\
img{max-width:100%;border:1px solid #ccc}";

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

/// Upload form, optionally with an error message above it.
pub fn index_page(error: Option<&str>) -> String {
    let error_html = error
        .map(|msg| format!("<p class=\"error\">{}</p>\n", escape(msg)))
        .unwrap_or_default();

    let body = format!(
        "<h1>Concrete Crack Classifier</h1>\n{error_html}\
         <form action=\"/predict\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <input type=\"file\" name=\"file\" accept=\"image/*\" required>\n\
         <button type=\"submit\">Classify</button>\n</form>"
    );
    layout("Concrete Crack Classifier", &body)
}

pub fn result_page(view: &PredictionView) -> String {
    let class = if view.label == "Crack" { "crack" } else { "no-crack" };
    let body = format!(
        "<h1>Result</h1>\n\
         <p>File: <strong>{filename}</strong></p>\n\
         <p>Prediction: <strong class=\"{class}\">{label}</strong></p>\n\
         <p>Crack probability: <strong>{p_crack}</strong></p>\n\
         <img src=\"data:image/jpeg;base64,{img}\" alt=\"{filename}\">\n\
         <p><a href=\"/\">Classify another image</a></p>",
        filename = escape(&view.filename),
        label = escape(view.label),
        p_crack = escape(&view.p_crack),
        img = view.img_b64,
    );
    layout("Result", &body)
}
