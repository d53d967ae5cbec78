//! PDF assembly with lopdf.
//!
//! Produces a title page followed by one page per story page. Each story
//! page has an illustration frame in the upper half, linked to the page's
//! image URL, and the wrapped story text below it.

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use super::{AssemblyPage, CollaboratorError, PdfAssembler};

/// US Letter, in points.
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const MARGIN: i64 = 54;

const TITLE_FONT_SIZE: i64 = 28;
const BODY_FONT_SIZE: i64 = 14;
const BODY_LEADING: i64 = 20;

/// Illustration frame: full text width, upper half of the page.
const FRAME_BOTTOM: i64 = 380;
const FRAME_TOP: i64 = PAGE_HEIGHT - MARGIN;

pub struct LopdfAssembler {
    /// Maximum characters per text line before wrapping.
    line_width: usize,
}

impl Default for LopdfAssembler {
    fn default() -> Self {
        Self { line_width: 60 }
    }
}

impl PdfAssembler for LopdfAssembler {
    fn assemble(&self, title: &str, pages: &[AssemblyPage]) -> Result<Vec<u8>, CollaboratorError> {
        let mut doc = Document::with_version("1.5");

        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(pages.len() + 1);
        kids.push(
            add_page(&mut doc, pages_id, resources_id, title_content(title), None).into(),
        );

        let mut ordered: Vec<&AssemblyPage> = pages.iter().collect();
        ordered.sort_by_key(|p| p.number);
        for page in ordered {
            let content = self.page_content(page);
            let link = link_annotation(&mut doc, &page.image_url);
            kids.push(add_page(&mut doc, pages_id, resources_id, content, Some(link)).into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer)
            .map_err(|e| CollaboratorError::Pdf(e.to_string()))?;
        Ok(buffer)
    }
}

impl LopdfAssembler {
    fn page_content(&self, page: &AssemblyPage) -> String {
        let mut content = String::new();

        // Illustration frame
        content.push_str("0.6 G 1 w\n");
        content.push_str(&format!(
            "{} {} {} {} re S\n",
            MARGIN,
            FRAME_BOTTOM,
            PAGE_WIDTH - 2 * MARGIN,
            FRAME_TOP - FRAME_BOTTOM
        ));

        content.push_str("BT\n");
        content.push_str(&format!("/F1 {} Tf\n", BODY_FONT_SIZE));
        content.push_str(&format!("{} TL\n", BODY_LEADING));
        content.push_str(&format!("{} {} Td\n", MARGIN, FRAME_BOTTOM - 2 * BODY_LEADING));
        for line in wrap_text(&page.text, self.line_width) {
            content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(&line)));
        }
        content.push_str("ET\n");

        // Page number, bottom centre
        content.push_str("BT\n");
        content.push_str("/F1 10 Tf\n");
        content.push_str(&format!("{} {} Td\n", PAGE_WIDTH / 2 - 5, MARGIN / 2));
        content.push_str(&format!("({}) Tj\n", page.number));
        content.push_str("ET\n");

        content
    }
}

fn title_content(title: &str) -> String {
    let mut content = String::new();
    content.push_str("BT\n");
    content.push_str(&format!("/F1 {} Tf\n", TITLE_FONT_SIZE));
    content.push_str(&format!("{} TL\n", TITLE_FONT_SIZE + 8));
    content.push_str(&format!("{} {} Td\n", MARGIN, PAGE_HEIGHT / 2 + TITLE_FONT_SIZE));
    for line in wrap_text(title, 30) {
        content.push_str(&format!("({}) Tj T*\n", escape_pdf_string(&line)));
    }
    content.push_str("ET\n");
    content
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    content: String,
    annotation: Option<ObjectId>,
) -> ObjectId {
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let mut page = dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    };
    if let Some(annotation) = annotation {
        page.set("Annots", vec![Object::Reference(annotation)]);
    }
    doc.add_object(page)
}

/// A link over the illustration frame pointing at the page image.
fn link_annotation(doc: &mut Document, url: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => vec![
            MARGIN.into(),
            FRAME_BOTTOM.into(),
            (PAGE_WIDTH - MARGIN).into(),
            FRAME_TOP.into(),
        ],
        "Border" => vec![0.into(), 0.into(), 0.into()],
        "A" => dictionary! {
            "S" => "URI",
            "URI" => Object::string_literal(url),
        },
    })
}

/// Greedy word wrap. Words longer than `width` get a line of their own.
fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}

/// Escapes a string for a PDF literal. The base-14 fonts only cover
/// Latin-1 here, so anything outside printable ASCII becomes `?`.
fn escape_pdf_string(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '(' | ')' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_ascii() && !c.is_control() => escaped.push(c),
            _ => escaped.push('?'),
        }
    }
    escaped
}
