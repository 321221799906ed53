use std::borrow::Cow;
use std::fmt::Write;

use crate::api::{RecommendationKind, Recommendations, RecommendedBook};

const PAGE_TITLE: &str = "Library - Recommendations";

/// Escapes text for use in HTML element content and quoted attribute values
fn escape_html(text: &str) -> Cow<'_, str> {
    html_escape::encode_quoted_attribute(text)
}

fn page_head(out: &mut String) {
    out.push_str(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
"#,
    );
    let _ = writeln!(out, "    <title>{}</title>", PAGE_TITLE);
    out.push_str(
        r#"    <link href="https://cdn.jsdelivr.net/npm/tailwindcss@2.2.19/dist/tailwind.min.css" rel="stylesheet">
</head>
<body class="bg-gray-100">
<div class="container mx-auto px-4 py-8">
"#,
    );
}

fn page_tail(out: &mut String) {
    out.push_str("</div>\n</body>\n</html>\n");
}

fn book_card(out: &mut String, recommended: &RecommendedBook) {
    let book = &recommended.book;
    out.push_str("                <div class=\"border p-4 rounded\">\n");
    let _ = writeln!(
        out,
        "                    <h3 class=\"font-semibold\">{}</h3>",
        escape_html(&book.title)
    );
    let _ = writeln!(
        out,
        "                    <p class=\"text-sm text-gray-600\">Genre: {}</p>",
        escape_html(&book.genre)
    );
    if recommended.kind == RecommendationKind::Popular {
        let _ = writeln!(
            out,
            "                    <p class=\"text-sm text-gray-500\">Score: {}</p>",
            book.popularity_score
        );
    }
    let _ = writeln!(
        out,
        r#"                    <form method="POST" action="/" class="mt-2">
                        <input type="hidden" name="book_id" value="{}">
                        <button type="submit" class="px-4 py-2 bg-blue-500 text-white rounded hover:bg-blue-600">
                            Reserve
                        </button>
                    </form>
                </div>"#,
        book.id
    );
}

fn recommendations_section(out: &mut String, heading: &str, books: &[RecommendedBook]) {
    out.push_str("        <div class=\"bg-white p-6 rounded-lg shadow\">\n");
    let _ = writeln!(
        out,
        "            <h2 class=\"text-xl font-semibold mb-4\">{}</h2>",
        heading
    );
    out.push_str("            <div class=\"grid gap-4\">\n");
    if books.is_empty() {
        out.push_str("                <p class=\"text-sm text-gray-500\">Nothing to recommend yet</p>\n");
    }
    for book in books {
        book_card(out, book);
    }
    out.push_str("            </div>\n        </div>\n");
}

/// Renders both recommendation lists with reserve buttons and an optional status banner
pub fn render_recommendations_page(
    recommendations: &Recommendations,
    message: Option<&str>,
) -> String {
    let mut out = String::new();
    page_head(&mut out);
    out.push_str("    <h1 class=\"text-3xl font-bold mb-8\">Book recommendations</h1>\n");

    if let Some(message) = message {
        let _ = writeln!(
            out,
            "    <div class=\"bg-blue-100 border-l-4 border-blue-500 text-blue-700 p-4 mb-4\">{}</div>",
            escape_html(message)
        );
    }

    out.push_str("    <div class=\"grid grid-cols-1 md:grid-cols-2 gap-8 mb-8\">\n");
    recommendations_section(
        &mut out,
        "Based on your favourite genres",
        &recommendations.by_genre,
    );
    recommendations_section(&mut out, "Popular books", &recommendations.popular);
    out.push_str("    </div>\n");

    page_tail(&mut out);
    out
}

/// Page shown when recommendations cannot be loaded, carries no internal details
pub fn render_error_page() -> String {
    let mut out = String::new();
    page_head(&mut out);
    out.push_str(
        "    <div class=\"bg-red-100 border-l-4 border-red-500 text-red-700 p-4 mb-4\">\
         The library is temporarily unavailable, please try again later.</div>\n",
    );
    page_tail(&mut out);
    out
}
