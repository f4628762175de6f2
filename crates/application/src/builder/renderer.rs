//! HTML renderer
//!
//! Pure function from `(Page, Site)` to a standalone HTML5 document.
//! Identical inputs produce byte-identical output; page hashes depend on
//! it. Every piece of user-supplied text passes through `escape_html`.

use atelier_core::content::{
    CardsSection, CtaSection, FeaturesSection, HeroSection, ImageSection, Section, TextSection,
};
use atelier_core::site::{Page, Site, SiteSettings};

/// Escape `&`, `<`, `>`, `"` and `'`.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

const KNOWN_ICONS: &[(&str, &str)] = &[
    ("code", "\u{1F4BB}"),
    ("palette", "\u{1F3A8}"),
    ("rocket", "\u{1F680}"),
    ("star", "\u{2B50}"),
    ("shield", "\u{1F6E1}\u{FE0F}"),
    ("zap", "\u{26A1}"),
    ("heart", "\u{2764}\u{FE0F}"),
    ("globe", "\u{1F310}"),
    ("mail", "\u{2709}\u{FE0F}"),
    ("phone", "\u{1F4DE}"),
    ("settings", "\u{2699}\u{FE0F}"),
    ("check", "\u{2705}"),
    ("chart", "\u{1F4CA}"),
    ("lock", "\u{1F512}"),
    ("cloud", "\u{2601}\u{FE0F}"),
    ("users", "\u{1F465}"),
];

const DEFAULT_ICON: &str = "\u{1F539}";

fn icon_emoji(name: &str) -> &'static str {
    KNOWN_ICONS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, emoji)| *emoji)
        .unwrap_or(DEFAULT_ICON)
}

fn theme_css(settings: &SiteSettings) -> String {
    format!(
        ":root{{--color-primary:{};--color-secondary:{};--color-bg:{};--color-text:{};--font-heading:{};--font-body:{}}}",
        escape_html(&settings.colors.primary),
        escape_html(&settings.colors.secondary),
        escape_html(&settings.colors.background),
        escape_html(&settings.colors.text),
        escape_html(&settings.fonts.heading),
        escape_html(&settings.fonts.body),
    )
}

const BASE_CSS: &str = concat!(
    "*{margin:0;padding:0;box-sizing:border-box}",
    "body{font-family:var(--font-body);background:var(--color-bg);color:var(--color-text);line-height:1.6}",
    "h1,h2,h3{font-family:var(--font-heading);line-height:1.2}",
    "a{color:var(--color-primary)}",
    "header nav{display:flex;gap:1.5rem;padding:1rem 2rem;border-bottom:1px solid rgba(0,0,0,.08)}",
    "header nav a{text-decoration:none}",
    "header nav a.active{font-weight:700;text-decoration:underline}",
    "main>section{padding:3rem 2rem;max-width:72rem;margin:0 auto}",
    ".hero{padding:5rem 2rem}",
    ".hero .subheading{font-size:1.25rem;opacity:.85;margin-top:.75rem}",
    ".btn{display:inline-block;margin-top:1.5rem;padding:.75rem 1.75rem;border-radius:.375rem;text-decoration:none}",
    ".btn-primary{background:var(--color-primary);color:#fff}",
    ".btn-secondary{background:var(--color-secondary);color:#fff}",
    ".btn-outline{border:2px solid var(--color-primary);color:var(--color-primary)}",
    ".grid{display:grid;gap:2rem;margin-top:2rem}",
    ".grid-2{grid-template-columns:repeat(2,1fr)}",
    ".grid-3{grid-template-columns:repeat(3,1fr)}",
    ".grid-4{grid-template-columns:repeat(4,1fr)}",
    ".card{padding:1.5rem;border:1px solid rgba(0,0,0,.08);border-radius:.5rem}",
    ".feature .icon{font-size:2rem}",
    "figure img{max-width:100%}",
    "figure.full-width{max-width:none}",
    "figcaption{font-size:.875rem;opacity:.75;margin-top:.5rem}",
    ".cta-banner{text-align:center;background:rgba(0,0,0,.03);border-radius:.75rem}",
    "footer{padding:2rem;border-top:1px solid rgba(0,0,0,.08);margin-top:3rem}",
    "footer nav{display:flex;gap:1rem;margin-top:.5rem}",
    "@media(max-width:768px){.grid-3,.grid-4{grid-template-columns:repeat(2,1fr)}}",
    "@media(max-width:480px){.grid-2,.grid-3,.grid-4{grid-template-columns:1fr}}",
);

fn render_head(title: &str, description: &str, settings: &SiteSettings) -> String {
    let title = escape_html(title);
    let description = escape_html(description);
    format!(
        "<head>\
         <meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>\
         <meta name=\"description\" content=\"{description}\">\
         <meta property=\"og:title\" content=\"{title}\">\
         <meta property=\"og:description\" content=\"{description}\">\
         <meta property=\"og:type\" content=\"website\">\
         <style>{}{}</style>\
         </head>",
        theme_css(settings),
        BASE_CSS,
    )
}

fn render_nav(settings: &SiteSettings, current_path: &str) -> String {
    if settings.navigation.is_empty() {
        return String::new();
    }
    let mut out = String::from("<header><nav>");
    for item in &settings.navigation {
        let class = if item.path == current_path {
            " class=\"active\""
        } else {
            ""
        };
        out.push_str(&format!(
            "<a href=\"{}\"{class}>{}</a>",
            escape_html(&item.path),
            escape_html(&item.label),
        ));
    }
    out.push_str("</nav></header>");
    out
}

fn render_footer(settings: &SiteSettings) -> String {
    let Some(footer) = &settings.footer else {
        return String::new();
    };
    let mut out = format!("<footer><p>{}</p>", escape_html(&footer.text));
    if !footer.links.is_empty() {
        out.push_str("<nav>");
        for link in &footer.links {
            out.push_str(&format!(
                "<a href=\"{}\">{}</a>",
                escape_html(&link.path),
                escape_html(&link.label),
            ));
        }
        out.push_str("</nav>");
    }
    out.push_str("</footer>");
    out
}

fn render_hero(hero: &HeroSection) -> String {
    let mut out = format!(
        "<section class=\"hero\" style=\"text-align:{}",
        hero.alignment.as_css()
    );
    if let Some(image) = &hero.background_image {
        out.push_str(&format!(
            ";background-image:url('{}');background-size:cover",
            escape_html(image)
        ));
    }
    out.push_str(&format!("\"><h1>{}</h1>", escape_html(&hero.heading)));
    if let Some(subheading) = &hero.subheading {
        out.push_str(&format!(
            "<p class=\"subheading\">{}</p>",
            escape_html(subheading)
        ));
    }
    if let (Some(text), Some(link)) = (&hero.cta_text, &hero.cta_link) {
        out.push_str(&format!(
            "<a class=\"btn btn-primary\" href=\"{}\">{}</a>",
            escape_html(link),
            escape_html(text),
        ));
    }
    out.push_str("</section>");
    out
}

fn render_text(text: &TextSection) -> String {
    let mut out = format!(
        "<section class=\"text\" style=\"text-align:{}\">",
        text.alignment.as_css()
    );
    if let Some(heading) = &text.heading {
        out.push_str(&format!("<h2>{}</h2>", escape_html(heading)));
    }
    out.push_str(&format!("<p>{}</p></section>", escape_html(&text.body)));
    out
}

fn render_features(features: &FeaturesSection) -> String {
    let mut out = String::from("<section class=\"features\">");
    if let Some(heading) = &features.heading {
        out.push_str(&format!("<h2>{}</h2>", escape_html(heading)));
    }
    out.push_str(&format!(
        "<div class=\"grid grid-{}\">",
        features.columns.count()
    ));
    for item in &features.items {
        out.push_str(&format!(
            "<div class=\"feature\"><span class=\"icon\">{}</span><h3>{}</h3><p>{}</p></div>",
            icon_emoji(&item.icon),
            escape_html(&item.title),
            escape_html(&item.description),
        ));
    }
    out.push_str("</div></section>");
    out
}

fn render_cards(cards: &CardsSection) -> String {
    let mut out = String::from("<section class=\"cards\">");
    if let Some(heading) = &cards.heading {
        out.push_str(&format!("<h2>{}</h2>", escape_html(heading)));
    }
    out.push_str(&format!(
        "<div class=\"grid grid-{}\">",
        cards.columns.count()
    ));
    for item in &cards.items {
        out.push_str("<div class=\"card\">");
        if let Some(image) = &item.image {
            out.push_str(&format!(
                "<img src=\"{}\" alt=\"{}\">",
                escape_html(image),
                escape_html(&item.title),
            ));
        }
        out.push_str(&format!(
            "<h3>{}</h3><p>{}</p>",
            escape_html(&item.title),
            escape_html(&item.description),
        ));
        if let Some(link) = &item.link {
            out.push_str(&format!(
                "<a href=\"{}\">Learn more</a>",
                escape_html(link)
            ));
        }
        out.push_str("</div>");
    }
    out.push_str("</div></section>");
    out
}

fn render_image(image: &ImageSection) -> String {
    let class = if image.full_width {
        "figure class=\"full-width\""
    } else {
        "figure"
    };
    let mut out = format!(
        "<section class=\"image\"><{class}><img src=\"{}\" alt=\"{}\">",
        escape_html(&image.src),
        escape_html(&image.alt),
    );
    if let Some(caption) = &image.caption {
        out.push_str(&format!("<figcaption>{}</figcaption>", escape_html(caption)));
    }
    out.push_str("</figure></section>");
    out
}

fn render_cta(cta: &CtaSection) -> String {
    let mut out = format!(
        "<section class=\"cta-banner\"><h2>{}</h2>",
        escape_html(&cta.heading)
    );
    if let Some(description) = &cta.description {
        out.push_str(&format!("<p>{}</p>", escape_html(description)));
    }
    out.push_str(&format!(
        "<a class=\"btn {}\" href=\"{}\">{}</a></section>",
        cta.variant.as_class(),
        escape_html(&cta.button_link),
        escape_html(&cta.button_text),
    ));
    out
}

fn render_section(section: &Section) -> String {
    match section {
        Section::Hero(s) => render_hero(s),
        Section::Text(s) => render_text(s),
        Section::Features(s) => render_features(s),
        Section::Cards(s) => render_cards(s),
        Section::Image(s) => render_image(s),
        Section::Cta(s) => render_cta(s),
        Section::Unknown { kind, .. } => {
            format!("<!-- unknown section type: {} -->", escape_html(kind))
        }
    }
}

/// Render one page of a site to a standalone HTML5 document.
pub fn render_page(page: &Page, site: &Site) -> String {
    let title = page.seo_title.as_deref().unwrap_or(&page.title);
    let description = page.seo_description.as_deref().unwrap_or(&page.title);

    let mut body = render_nav(&site.settings, &page.path);
    body.push_str("<main>");
    for section in &page.content.sections {
        body.push_str(&render_section(section));
    }
    body.push_str("</main>");
    body.push_str(&render_footer(&site.settings));

    format!(
        "<!DOCTYPE html><html lang=\"en\">{}<body>{body}</body></html>",
        render_head(title, description, &site.settings),
    )
}

/// The per-version 404 document, uploaded alongside the pages.
pub fn render_not_found(site: &Site) -> String {
    let body = format!(
        "{}<main><section class=\"hero\" style=\"text-align:center\">\
         <h1>Page not found</h1>\
         <p class=\"subheading\">The page you are looking for does not exist on {}.</p>\
         <a class=\"btn btn-primary\" href=\"/\">Back to home</a>\
         </section></main>{}",
        render_nav(&site.settings, ""),
        escape_html(&site.name),
        render_footer(&site.settings),
    );
    format!(
        "<!DOCTYPE html><html lang=\"en\">{}<body>{body}</body></html>",
        render_head("Page not found", "Page not found", &site.settings),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::content::{Alignment, Columns, FeatureItem, PageContent};
    use atelier_core::site::{NavItem, SiteSettings};
    use atelier_core::TenantId;
    use serde_json::json;

    fn site() -> Site {
        let mut settings = SiteSettings::default();
        settings.navigation = vec![
            NavItem {
                label: "Home".to_string(),
                path: "/".to_string(),
            },
            NavItem {
                label: "About".to_string(),
                path: "/about".to_string(),
            },
        ];
        Site::new(TenantId::new(), "Acme", "acme", "acme", settings).unwrap()
    }

    fn page_with(sections: Vec<Section>) -> Page {
        Page::new(
            site().id,
            "/",
            "Home",
            PageContent { sections },
        )
        .unwrap()
    }

    #[test]
    fn escapes_every_dangerous_character() {
        let escaped = escape_html("<script>alert(\"x&y'\")</script>");
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert!(!escaped.contains('"'));
        assert!(!escaped.contains('\''));
        assert_eq!(
            escaped,
            "&lt;script&gt;alert(&quot;x&amp;y&#39;&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn user_text_never_reaches_output_raw() {
        let hostile = "<img src=x onerror=alert(1)>";
        let page = page_with(vec![Section::Hero(HeroSection {
            heading: hostile.to_string(),
            subheading: Some(hostile.to_string()),
            ..Default::default()
        })]);
        let html = render_page(&page, &site());
        assert!(!html.contains(hostile));
        assert!(html.contains("&lt;img src=x onerror=alert(1)&gt;"));
    }

    #[test]
    fn document_skeleton_is_complete() {
        let page = page_with(vec![]);
        let html = render_page(&page, &site());
        assert!(html.starts_with("<!DOCTYPE html><html lang=\"en\">"));
        assert!(html.contains("<meta charset=\"utf-8\">"));
        assert!(html.contains("width=device-width"));
        assert!(html.contains("og:type\" content=\"website\""));
        assert!(html.contains("--color-primary:"));
        assert!(html.contains("--font-heading:"));
        assert!(html.ends_with("</body></html>"));
    }

    #[test]
    fn seo_title_wins_over_title() {
        let mut page = page_with(vec![]);
        page.seo_title = Some("Better Title".to_string());
        let html = render_page(&page, &site());
        assert!(html.contains("<title>Better Title</title>"));
    }

    #[test]
    fn current_nav_item_is_active() {
        let page = page_with(vec![]);
        let html = render_page(&page, &site());
        assert!(html.contains("<a href=\"/\" class=\"active\">Home</a>"));
        assert!(html.contains("<a href=\"/about\">About</a>"));
    }

    #[test]
    fn known_icons_map_to_emoji_and_unknown_to_default() {
        assert_eq!(icon_emoji("rocket"), "\u{1F680}");
        assert_eq!(icon_emoji("sparkle-pony"), DEFAULT_ICON);
    }

    #[test]
    fn features_grid_uses_column_class() {
        let page = page_with(vec![Section::Features(FeaturesSection {
            heading: None,
            columns: Columns::Four,
            items: vec![FeatureItem {
                icon: "zap".to_string(),
                title: "Fast".to_string(),
                description: "Quick".to_string(),
            }],
        })]);
        let html = render_page(&page, &site());
        assert!(html.contains("grid grid-4"));
        assert!(html.contains('\u{26A1}'));
    }

    #[test]
    fn unknown_section_emits_comment() {
        let section: Section = serde_json::from_value(json!({"type": "carousel"})).unwrap();
        let page = page_with(vec![section]);
        let html = render_page(&page, &site());
        assert!(html.contains("<!-- unknown section type: carousel -->"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let page = page_with(vec![
            Section::Text(TextSection {
                heading: Some("H".to_string()),
                body: "B".to_string(),
                alignment: Alignment::Left,
            }),
            Section::Cta(CtaSection {
                heading: "Go".to_string(),
                description: None,
                button_text: "Now".to_string(),
                button_link: "/go".to_string(),
                variant: Default::default(),
            }),
        ]);
        let site = site();
        assert_eq!(render_page(&page, &site), render_page(&page, &site));
    }

    #[test]
    fn not_found_page_is_standalone() {
        let html = render_not_found(&site());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Page not found"));
        assert!(html.contains("Acme"));
    }
}
