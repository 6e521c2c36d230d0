diesel::table! {
    attachments (attachment_id) {
        attachment_id -> Text,
        doc_id -> Text,
        filename -> Text,
        file_path -> Text,
        file_size -> BigInt,
        mime_type -> Nullable<Text>,
        version_label -> Text,
        is_current -> Bool,
        uploaded_at -> Timestamp,
        uploaded_by -> Text,
    }
}

diesel::table! {
    categories (code) {
        code -> Text,
        name -> Text,
        is_active -> Bool,
        sort_order -> Integer,
    }
}

diesel::table! {
    document_history (history_id) {
        history_id -> Text,
        doc_id -> Text,
        action -> Text,
        field_changed -> Nullable<Text>,
        old_value -> Nullable<Text>,
        new_value -> Nullable<Text>,
        changed_by -> Text,
        changed_at -> Timestamp,
        notes -> Nullable<Text>,
    }
}

diesel::table! {
    document_links (link_id) {
        link_id -> Text,
        parent_doc_id -> Text,
        child_doc_id -> Text,
        link_type -> Text,
        created_at -> Timestamp,
        created_by -> Text,
    }
}

diesel::table! {
    documents (doc_id) {
        doc_id -> Text,
        doc_type -> Text,
        doc_ref -> Text,
        title -> Text,
        description -> Nullable<Text>,
        category -> Text,
        owner -> Text,
        approver -> Nullable<Text>,
        status -> Text,
        version -> Text,
        effective_date -> Date,
        last_review_date -> Date,
        next_review_date -> Date,
        review_frequency -> Text,
        notes -> Nullable<Text>,
        applicable_entity -> Nullable<Text>,
        created_at -> Timestamp,
        created_by -> Text,
        updated_at -> Timestamp,
        updated_by -> Text,
    }
}

diesel::table! {
    settings (key) {
        key -> Text,
        value -> Nullable<Text>,
        updated_at -> Nullable<Timestamp>,
        updated_by -> Nullable<Text>,
    }
}

diesel::table! {
    users (user_id) {
        user_id -> Text,
        username -> Text,
        password_hash -> Text,
        full_name -> Text,
        role -> Text,
        is_active -> Bool,
        allowed_categories -> Nullable<Text>,
        allowed_entities -> Nullable<Text>,
        created_at -> Timestamp,
        created_by -> Nullable<Text>,
        last_login -> Nullable<Timestamp>,
    }
}

diesel::joinable!(attachments -> documents (doc_id));
diesel::joinable!(documents -> categories (category));

diesel::allow_tables_to_appear_in_same_query!(
    attachments,
    categories,
    document_history,
    document_links,
    documents,
    settings,
    users,
);
