// Arabic prompts for the `rag` group

pub const SYSTEM_PROMPT: &str = "\
أنت مساعد لتوليد رد للمستخدم.
سيتم تزويدك بمجموعة من المستندات المرتبطة باستفسار المستخدم.
عليك توليد رد بناءً على المستندات المقدمة.
تجاهل المستندات التي لا تتعلق باستفسار المستخدم.
يمكنك الاعتذار للمستخدم إذا لم تتمكن من توليد رد.
عليك توليد الرد بنفس لغة استفسار المستخدم.
كن مهذبًا ومحترمًا مع المستخدم.
كن دقيقًا وموجزًا في ردك. تجنب المعلومات غير الضرورية.";

pub const DOCUMENT_PROMPT: &str = "\
## رقم المستند: $doc_num
### المحتوى: $chunk_text";

pub const FOOTER_PROMPT: &str = "\
بناءً فقط على المستندات السابقة، يرجى توليد إجابة للمستخدم.
## السؤال:
$query

## الإجابة: ";
