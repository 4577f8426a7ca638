//! OpenAPI document for the generated surface.
//!
//! Route synthesis records one [`OperationDoc`] per handler; every wire schema of every
//! namespace becomes a component.

use super::{Namespace, WireField, WireSchema, BASE};
use crate::config::ApiSettings;
use axum::http::Method;
use std::collections::BTreeMap;
use utoipa::openapi::{
    content::ContentBuilder,
    info::InfoBuilder,
    path::{HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn, PathItemBuilder, PathsBuilder},
    request_body::RequestBodyBuilder,
    response::{ResponseBuilder, ResponsesBuilder},
    schema::{ArrayBuilder, ComponentsBuilder, KnownFormat, ObjectBuilder, Schema, SchemaFormat, SchemaType, Type},
    security::{ApiKey, ApiKeyValue, SecurityRequirement, SecurityScheme},
    OpenApi, OpenApiBuilder, Ref, RefOr, Required,
};

const SECURITY_SCHEME: &str = "apiKey";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
}

#[derive(Clone, Debug)]
pub struct ParamDoc {
    pub name: String,
    pub location: ParamLocation,
    pub description: String,
}

impl ParamDoc {
    pub fn query(name: impl Into<String>, description: impl Into<String>) -> Self {
        ParamDoc {
            name: name.into(),
            location: ParamLocation::Query,
            description: description.into(),
        }
    }

    pub fn path(name: impl Into<String>) -> Self {
        ParamDoc {
            name: name.into(),
            location: ParamLocation::Path,
            description: String::new(),
        }
    }
}

/// One synthesized handler as it appears in the document.
#[derive(Clone, Debug)]
pub struct OperationDoc {
    /// Axum path template (`:param` segments).
    pub path: String,
    pub method: Method,
    pub tag: String,
    pub operation_id: String,
    pub summary: String,
    pub params: Vec<ParamDoc>,
    /// Payload schema name.
    pub request: Option<String>,
    pub status: u16,
    /// Response schema name.
    pub response: String,
    pub response_description: String,
    /// Description of the 400 response when the route documents one of its own.
    pub bad_request: Option<String>,
}

impl OperationDoc {
    pub fn new(path: impl Into<String>, method: Method, tag: impl Into<String>, operation_id: impl Into<String>) -> Self {
        OperationDoc {
            path: path.into(),
            method,
            tag: tag.into(),
            operation_id: operation_id.into(),
            summary: String::new(),
            params: Vec::new(),
            request: None,
            status: 200,
            response: BASE.into(),
            response_description: "Success".into(),
            bad_request: None,
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn param(mut self, param: ParamDoc) -> Self {
        self.params.push(param);
        self
    }

    pub fn request(mut self, schema: impl Into<String>) -> Self {
        self.request = Some(schema.into());
        self
    }

    pub fn response(mut self, status: u16, schema: impl Into<String>, description: impl Into<String>) -> Self {
        self.status = status;
        self.response = schema.into();
        self.response_description = description.into();
        self
    }

    pub fn bad_request(mut self, description: impl Into<String>) -> Self {
        self.bad_request = Some(description.into());
        self
    }
}

/// Everything collected while synthesizing routes.
#[derive(Clone, Debug, Default)]
pub struct ApiDoc {
    pub namespaces: Vec<Namespace>,
    pub operations: Vec<OperationDoc>,
}

/// `/x/:id` -> `/x/{id}`.
pub fn openapi_path(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(param) => format!("{{{}}}", param),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn typed(ty: Type, format: Option<KnownFormat>) -> RefOr<Schema> {
    let mut builder = ObjectBuilder::new().schema_type(SchemaType::Type(ty));
    if let Some(format) = format {
        builder = builder.format(Some(SchemaFormat::KnownFormat(format)));
    }
    RefOr::T(Schema::Object(builder.build()))
}

fn field_schema(field: &WireField) -> RefOr<Schema> {
    match field {
        WireField::String => typed(Type::String, None),
        WireField::Boolean => typed(Type::Boolean, None),
        WireField::Integer => typed(Type::Integer, None),
        WireField::Float => typed(Type::Number, None),
        WireField::Date => typed(Type::String, Some(KnownFormat::Date)),
        WireField::DateTime => typed(Type::String, Some(KnownFormat::DateTime)),
        WireField::IdList => RefOr::T(Schema::Array(
            ArrayBuilder::new().items(typed(Type::Integer, None)).build(),
        )),
        WireField::Nested(name) => RefOr::Ref(Ref::from_schema_name(name.clone())),
        WireField::List(inner) => RefOr::T(Schema::Array(ArrayBuilder::new().items(field_schema(inner)).build())),
    }
}

fn wire_schema(schema: &WireSchema) -> Schema {
    let mut builder = ObjectBuilder::new().schema_type(SchemaType::Type(Type::Object));
    for (name, field) in &schema.fields {
        builder = builder.property(name.clone(), field_schema(field));
    }
    Schema::Object(builder.build())
}

fn json_response(description: &str, schema: &str) -> utoipa::openapi::Response {
    let content = ContentBuilder::new()
        .schema(Some(RefOr::Ref(Ref::from_schema_name(schema.to_string()))))
        .build();
    ResponseBuilder::new()
        .description(description)
        .content("application/json", content)
        .build()
}

fn http_method(method: &Method) -> HttpMethod {
    match *method {
        Method::POST => HttpMethod::Post,
        Method::PUT => HttpMethod::Put,
        Method::DELETE => HttpMethod::Delete,
        Method::PATCH => HttpMethod::Patch,
        _ => HttpMethod::Get,
    }
}

pub fn build(doc: &ApiDoc, settings: &ApiSettings) -> OpenApi {
    let mut components = ComponentsBuilder::new();
    let mut seen = BTreeMap::new();
    for ns in &doc.namespaces {
        for schema in ns.schemas() {
            seen.entry(schema.name.clone()).or_insert_with(|| wire_schema(schema));
        }
    }
    for (name, schema) in seen {
        components = components.schema(name, schema);
    }
    components = components.security_scheme(
        SECURITY_SCHEME,
        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(settings.auth_header.clone()))),
    );

    let mut by_path: BTreeMap<String, PathItemBuilder> = BTreeMap::new();
    for op_doc in &doc.operations {
        let mut op = OperationBuilder::new()
            .operation_id(Some(op_doc.operation_id.clone()))
            .summary(Some(op_doc.summary.clone()))
            .tag(op_doc.tag.clone())
            .security(SecurityRequirement::new(SECURITY_SCHEME, Vec::<String>::new()));
        for p in &op_doc.params {
            let (location, required) = match p.location {
                ParamLocation::Path => (ParameterIn::Path, Required::True),
                ParamLocation::Query => (ParameterIn::Query, Required::False),
            };
            let schema = typed(Type::String, None);
            op = op.parameter(
                ParameterBuilder::new()
                    .name(&p.name)
                    .parameter_in(location)
                    .required(required)
                    .description(Some(p.description.clone()).filter(|d| !d.is_empty()))
                    .schema(Some(schema))
                    .build(),
            );
        }
        if let Some(payload) = &op_doc.request {
            let content = ContentBuilder::new()
                .schema(Some(RefOr::Ref(Ref::from_schema_name(payload.clone()))))
                .build();
            op = op.request_body(Some(
                RequestBodyBuilder::new()
                    .content("application/json", content)
                    .required(Some(Required::True))
                    .build(),
            ));
        }
        let responses = ResponsesBuilder::new()
            .response(
                op_doc.status.to_string(),
                json_response(&op_doc.response_description, &op_doc.response),
            )
            .response("400", json_response(op_doc.bad_request.as_deref().unwrap_or("Failure"), BASE))
            .response("401", json_response("Access level insufficient", BASE))
            .build();
        op = op.responses(responses);

        let path = openapi_path(&op_doc.path);
        let item = by_path.remove(&path).unwrap_or_else(PathItemBuilder::new);
        by_path.insert(path, item.operation(http_method(&op_doc.method), op.build()));
    }
    let mut paths = PathsBuilder::new();
    for (path, item) in by_path {
        paths = paths.path(path, item.build());
    }

    let info = InfoBuilder::new()
        .title(settings.title.clone())
        .version(settings.version.clone())
        .build();
    tracing::debug!(operations = doc.operations.len(), "built OpenAPI document");
    OpenApiBuilder::new()
        .info(info)
        .paths(paths.build())
        .components(Some(components.build()))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::session_namespace;

    #[test]
    fn converts_axum_paths() {
        assert_eq!(openapi_path("/api/p/:pid/child/:id"), "/api/p/{pid}/child/{id}");
        assert_eq!(openapi_path("/api/child/"), "/api/child/");
    }

    #[test]
    fn document_lists_operations_and_components() {
        let doc = ApiDoc {
            namespaces: vec![session_namespace()],
            operations: vec![
                OperationDoc::new("/api/session/new", Method::GET, "session", "session-new")
                    .response(200, "session-response", "Started session"),
                OperationDoc::new("/api/session/save/:id", Method::GET, "session", "session-save")
                    .param(ParamDoc::path("id"))
                    .response(200, "session-action-response", "Committed"),
            ],
        };
        let api = build(&doc, &ApiSettings::default());
        let json = serde_json::to_value(&api).unwrap();
        assert!(json["paths"]["/api/session/save/{id}"]["get"].is_object());
        assert!(json["components"]["schemas"]["session-objects"].is_object());
        assert_eq!(
            json["components"]["securitySchemes"]["apiKey"]["name"],
            serde_json::json!("X-API-KEY")
        );
    }
}
